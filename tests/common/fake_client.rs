#![allow(dead_code)]

use adwatch_server::check_client::{AdCheckClient, AdEntry, CheckError, CheckRequest, CheckResult};
use adwatch_server::clock::ManualClock;
use adwatch_server::job_store::{Job, JobId};
use adwatch_server::notifications::AdNotifier;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::Semaphore;

/// Number of ads to return, or the error to fail with.
pub type Scripted = Result<usize, CheckError>;

/// Answers each query from a per-query script, then with "no ads" once the
/// script runs out. Every call advances the clock by one minute.
pub struct ScriptedClient {
    clock: ManualClock,
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<HashMap<String, usize>>,
    held: Mutex<HashMap<String, std::sync::Arc<Semaphore>>>,
}

impl ScriptedClient {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
        }
    }

    pub fn script(&self, query: &str, responses: Vec<Scripted>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(query.to_string(), responses.into());
    }

    pub fn calls(&self, query: &str) -> usize {
        self.calls.lock().unwrap().get(query).copied().unwrap_or(0)
    }

    /// Checks for `query` block until [`ScriptedClient::release`].
    pub fn hold(&self, query: &str) {
        self.held
            .lock()
            .unwrap()
            .insert(query.to_string(), std::sync::Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, query: &str) {
        if let Some(gate) = self.held.lock().unwrap().get(query) {
            gate.add_permits(1024);
        }
    }
}

#[async_trait]
impl AdCheckClient for ScriptedClient {
    async fn check(&self, request: &CheckRequest) -> Result<CheckResult, CheckError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(request.query.clone())
            .or_insert(0) += 1;

        let gate = self.held.lock().unwrap().get(&request.query).cloned();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.unwrap();
        }

        self.clock.advance(chrono::Duration::minutes(1));

        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.query)
            .and_then(|script| script.pop_front())
            .unwrap_or(Ok(0));
        let count = next?;
        let ads = (0..count)
            .map(|i| AdEntry {
                title: format!("{} ad {}", request.query, i),
                url: format!("https://ad{}.example", i),
            })
            .collect();
        Ok(CheckResult::from_ads(request.query.clone(), ads))
    }
}

/// Remembers which jobs triggered an ads alert.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(JobId, u32)>>,
    chats: Mutex<Vec<Option<String>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(JobId, u32)> {
        self.sent.lock().unwrap().clone()
    }

    /// Per-job alert chat of every alert, in send order.
    pub fn chats(&self) -> Vec<Option<String>> {
        self.chats.lock().unwrap().clone()
    }
}

#[async_trait]
impl AdNotifier for RecordingNotifier {
    async fn notify_ads_found(&self, job: &Job, result: &CheckResult) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((job.id, result.ads_count));
        self.chats.lock().unwrap().push(job.notify_chat_id.clone());
        Ok(())
    }
}
