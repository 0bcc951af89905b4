// ABOUTME: Terminal chat front end: stdin lines become prompts, answers are printed.
// ABOUTME: Keeps thread history in memory so follow-ups recover affinity like a real chat.

use anyhow::Result;
use async_trait::async_trait;
use promptq_core::{ChatFrontend, ChatOrigin, IncomingPrompt, ThreadMessage};
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// The single channel a terminal session talks in
pub const CONSOLE_CHANNEL: &str = "console";

/// Author id used for lines typed by the local user
pub const CONSOLE_USER: &str = "you";

/// A line of terminal input, interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Prompt(IncomingPrompt),
    /// `/new`: the next prompt starts a fresh thread
    NewThread,
    /// `/quit` or `/exit`
    Quit,
    /// Blank line
    Empty,
}

pub struct ConsoleFrontend {
    bot_user_id: String,
    threads: Mutex<HashMap<String, Vec<ThreadMessage>>>,
    current_thread: Mutex<Option<String>>,
    out: Mutex<Box<dyn Write + Send>>,
    seq: AtomicU64,
}

impl ConsoleFrontend {
    /// Front end printing to stdout
    pub fn new(bot_user_id: impl Into<String>) -> Self {
        Self::with_writer(bot_user_id, Box::new(std::io::stdout()))
    }

    pub fn with_writer(bot_user_id: impl Into<String>, out: Box<dyn Write + Send>) -> Self {
        Self {
            bot_user_id: bot_user_id.into(),
            threads: Mutex::new(HashMap::new()),
            current_thread: Mutex::new(None),
            out: Mutex::new(out),
            seq: AtomicU64::new(0),
        }
    }

    /// Turn a typed line into a prompt in the current thread.
    ///
    /// The first prompt after start or `/new` opens a thread rooted at its own ts.
    pub fn read_line(&self, line: &str) -> ConsoleInput {
        let text = line.trim();
        match text {
            "" => return ConsoleInput::Empty,
            "/quit" | "/exit" => return ConsoleInput::Quit,
            "/new" => {
                *lock(&self.current_thread) = None;
                return ConsoleInput::NewThread;
            }
            _ => {}
        }

        let ts = self.next_ts();
        let thread_ts = {
            let mut current = lock(&self.current_thread);
            let thread_ts = current.clone();
            if current.is_none() {
                *current = Some(ts.clone());
            }
            thread_ts
        };

        let root = thread_ts.as_deref().unwrap_or(&ts);
        lock(&self.threads)
            .entry(thread_key(CONSOLE_CHANNEL, root))
            .or_default()
            .push(ThreadMessage::new(CONSOLE_USER, text));

        ConsoleInput::Prompt(IncomingPrompt {
            origin: ChatOrigin {
                channel: CONSOLE_CHANNEL.to_string(),
                ts,
                thread_ts,
            },
            text: text.to_string(),
        })
    }

    /// Root ts of the thread new prompts are posted in
    pub fn current_thread(&self) -> Option<String> {
        lock(&self.current_thread).clone()
    }

    // "seconds.micros" plus a per-session sequence number
    fn next_ts(&self) -> String {
        let now = chrono::Utc::now();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}.{:06}{}",
            now.timestamp(),
            now.timestamp_subsec_micros(),
            seq
        )
    }

    fn print(&self, text: &str) -> Result<()> {
        let mut out = lock(&self.out);
        writeln!(out, "{}", text)?;
        out.flush()?;
        Ok(())
    }
}

fn thread_key(channel: &str, thread_ts: &str) -> String {
    format!("{}/{}", channel, thread_ts)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl ChatFrontend for ConsoleFrontend {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn thread_history(&self, channel: &str, thread_ts: &str) -> Result<Vec<ThreadMessage>> {
        Ok(lock(&self.threads)
            .get(&thread_key(channel, thread_ts))
            .cloned()
            .unwrap_or_default())
    }

    async fn post_reply(&self, channel: &str, thread_ts: &str, text: &str) -> Result<()> {
        lock(&self.threads)
            .entry(thread_key(channel, thread_ts))
            .or_default()
            .push(ThreadMessage::new(self.bot_user_id.clone(), text));
        self.print(&format!("\n{}> {}\n", self.bot_user_id, text))
    }

    async fn add_reaction(&self, _channel: &str, ts: &str, name: &str) -> Result<()> {
        self.print(&format!("  [{}] :{}:", ts, name))
    }

    async fn remove_reaction(&self, _channel: &str, ts: &str, name: &str) -> Result<()> {
        tracing::debug!(ts = %ts, reaction = %name, "Reaction cleared");
        Ok(())
    }
}
