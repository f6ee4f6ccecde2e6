use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::sync::Mutex;

use async_trait::async_trait;
use indicatif::ProgressBar;

use super::Operator;

/// Asks on stdout and reads one line from stdin, with the progress bar
/// suspended so it cannot draw over the prompt.
#[derive(Clone, Debug)]
pub struct ConsoleOperator {
    bar: ProgressBar,
}

impl Default for ConsoleOperator {
    fn default() -> Self {
        Self::new(ProgressBar::hidden())
    }
}

impl ConsoleOperator {
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

fn prompt(
    bar: &ProgressBar,
    question: &str,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> String {
    bar.suspend(|| {
        let _ = write!(output, "{question} ");
        let _ = output.flush();
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(_) => line.trim().to_string(),
            Err(_) => String::new(),
        }
    })
}

#[async_trait]
impl Operator for ConsoleOperator {
    async fn ask(&self, question: &str) -> String {
        let bar = self.bar.clone();
        let question = question.to_string();
        tokio::task::spawn_blocking(move || {
            prompt(
                &bar,
                &question,
                &mut std::io::stdin().lock(),
                &mut std::io::stdout(),
            )
        })
        .await
        .unwrap_or_default()
    }
}

/// Replays canned answers; an exhausted script answers with an empty line.
#[derive(Default)]
pub struct ScriptedOperator {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.asked.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn ask(&self, question: &str) -> String {
        self.asked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(question.to_string());
        self.answers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_default()
    }
}
