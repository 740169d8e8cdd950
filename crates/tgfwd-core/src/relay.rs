use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    commands::Command,
    config::Config,
    domain::MessageId,
    ports::{ChannelPort, ForwardOutcome},
    progress::ProgressStore,
    settings::SettingsStore,
};

/// Consecutive missing ids after which the source history is considered
/// exhausted. Individual deleted messages are skipped; only a long
/// uninterrupted run of absent ids means we walked past the head.
const EXHAUSTED_AFTER_MISSES: u32 = 50;

const ALREADY_RUNNING_REPLY: &str = "⚠️ Already running. Use /off first to restart.";
const ALREADY_STOPPED_REPLY: &str = "⚠️ Already stopped.";
const SETTING_USAGE_REPLY: &str = "⚙️ Wrong format.\nUse:\n/setting <minutes>\n/setting start <id>";
const LINK_USAGE_REPLY: &str =
    "⚙️ Wrong format.\nUse: /start https://t.me/c/<channel_id>/<message_id>";
const HELP_REPLY: &str = "❓ Unknown command. Available: /on, /off, /start <link>, /status, /setting";

#[derive(Default)]
struct RunState {
    running: bool,
    task: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
    interval_minutes: u64,
    start_from_id: i32,
    started_at: Option<DateTime<Utc>>,

    // Bumped on every start so a stale run's cleanup cannot clobber the
    // state of a run launched after it was stopped.
    generation: u64,
}

/// Point-in-time view of the run-control state for `/status`.
#[derive(Clone, Debug)]
pub struct RelayStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub interval_minutes: u64,
    pub start_from_id: i32,
    pub checkpoint: i32,
}

/// The sequential forwarding service.
///
/// Owns the run-control state (one active forwarding task at most) and the
/// two stores. Operator commands are applied through [`handle_command`],
/// which returns the reply text to send back to the operator chat.
///
/// [`handle_command`]: RelayService::handle_command
#[derive(Clone)]
pub struct RelayService {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    channel: Arc<dyn ChannelPort>,
    progress: ProgressStore,
    settings: SettingsStore,
    state: Mutex<RunState>,
}

impl RelayService {
    pub fn new(cfg: &Config, channel: Arc<dyn ChannelPort>) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                channel,
                progress: ProgressStore::new(cfg.progress_file.clone()),
                settings: SettingsStore::new(cfg.env_file.clone()),
                state: Mutex::new(RunState {
                    interval_minutes: cfg.forward_interval_minutes,
                    start_from_id: cfg.start_from_id,
                    ..RunState::default()
                }),
            }),
        }
    }

    /// Apply one operator command and produce the reply text.
    pub async fn handle_command(&self, cmd: Command) -> String {
        match cmd {
            Command::On => self.start().await,
            Command::Off => self.stop().await,
            Command::SetInterval(minutes) => self.set_interval(minutes).await,
            Command::SetStartId(id) => {
                self.set_start_id(id).await;
                format!("✅ Start id set to {id}. Send /on to begin forwarding.")
            }
            Command::StartFromLink(id) => {
                self.set_start_id(id).await;
                format!("✅ Start point set to {id}. Send /on to begin forwarding.")
            }
            Command::Status => self.status_text().await,
            Command::BadSetting => SETTING_USAGE_REPLY.to_string(),
            Command::BadLink => LINK_USAGE_REPLY.to_string(),
            Command::Unknown => HELP_REPLY.to_string(),
        }
    }

    pub async fn status(&self) -> RelayStatus {
        let st = self.inner.state.lock().await;
        RelayStatus {
            running: st.running,
            started_at: st.started_at,
            interval_minutes: st.interval_minutes,
            start_from_id: st.start_from_id,
            checkpoint: self.inner.progress.load(),
        }
    }

    async fn start(&self) -> String {
        let mut st = self.inner.state.lock().await;
        if st.running || st.task.is_some() {
            return ALREADY_RUNNING_REPLY.to_string();
        }

        let cancel = CancellationToken::new();
        st.running = true;
        st.started_at = Some(Utc::now());
        st.cancel = Some(cancel.clone());
        st.generation += 1;
        let generation = st.generation;

        let service = self.clone();
        st.task = Some(tokio::spawn(async move {
            service.run(generation, cancel).await;
        }));

        "✅ Forwarding started.".to_string()
    }

    async fn stop(&self) -> String {
        let mut st = self.inner.state.lock().await;
        if !st.running && st.task.is_none() {
            return ALREADY_STOPPED_REPLY.to_string();
        }

        st.running = false;
        st.started_at = None;
        if let Some(cancel) = st.cancel.take() {
            cancel.cancel();
        }
        // The loop observes the cancellation at its next suspension point and
        // exits on its own; dropping the handle just detaches it.
        st.task.take();

        "🛑 Forwarding stopped.".to_string()
    }

    async fn set_interval(&self, minutes: u64) -> String {
        {
            let mut st = self.inner.state.lock().await;
            st.interval_minutes = minutes;
        }
        if let Err(e) = self
            .inner
            .settings
            .set("FORWARD_INTERVAL_MINUTES", &minutes.to_string())
        {
            warn!(error = %e, "failed to persist interval setting");
        }
        format!("✅ Interval set to {minutes} minute(s).")
    }

    async fn set_start_id(&self, id: i32) {
        {
            let mut st = self.inner.state.lock().await;
            st.start_from_id = id;
        }
        if let Err(e) = self.inner.settings.set("START_FROM_ID", &id.to_string()) {
            warn!(error = %e, "failed to persist start id setting");
        }
        if let Err(e) = self.inner.progress.save(id) {
            warn!(error = %e, "failed to write checkpoint for start id");
        }
    }

    async fn status_text(&self) -> String {
        let status = self.status().await;
        let state_line = if status.running {
            match status.started_at {
                Some(at) => format!("🟢 Running since {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
                None => "🟢 Running".to_string(),
            }
        } else {
            "🔴 Stopped".to_string()
        };
        format!(
            "📊 Status: {state_line}\n\
             ⏱️ Interval: {} minute(s)\n\
             ▶️ Start from id: {}\n\
             📨 Last forwarded id: {}",
            status.interval_minutes, status.start_from_id, status.checkpoint
        )
    }

    // === Forwarding loop ===

    async fn run(self, generation: u64, cancel: CancellationToken) {
        let start_id = self.compute_start_id().await;
        info!(start_id, "forwarding run starting");

        // Send the boundary message explicitly, exactly once; enumeration
        // below is strictly after it.
        self.forward_boundary(start_id, &cancel).await;

        let mut current = start_id;
        let mut misses = 0u32;
        loop {
            if cancel.is_cancelled() || !self.is_running().await {
                info!("forwarding stopped");
                break;
            }

            current += 1;
            match self.inner.channel.forward(MessageId(current)).await {
                Ok(ForwardOutcome::Forwarded) => {
                    misses = 0;
                    self.checkpoint(current);
                    self.pace(&cancel).await;
                }
                Ok(ForwardOutcome::Missing) => {
                    misses += 1;
                    if misses >= EXHAUSTED_AFTER_MISSES {
                        info!(last_probed = current, "reached end of source history");
                        break;
                    }
                }
                Ok(ForwardOutcome::NotForwardable) => {
                    misses = 0;
                    debug!(id = current, "skipping non-content message");
                }
                Err(e) => {
                    misses = 0;
                    warn!(id = current, error = %e, "forward failed, skipping message");
                }
            }
        }

        // Cleanup on every exit path so a later /on is always accepted. A
        // newer run may already own the state; leave it alone in that case.
        let mut st = self.inner.state.lock().await;
        if st.generation == generation {
            st.running = false;
            st.task = None;
            st.cancel = None;
            st.started_at = None;
        }
    }

    /// Offset computation: an operator-set start id overrides the checkpoint
    /// (and rewrites it); otherwise resume strictly after the last success.
    async fn compute_start_id(&self) -> i32 {
        let saved = self.inner.progress.load();
        let configured = {
            let st = self.inner.state.lock().await;
            st.start_from_id
        };

        if configured != 0 && configured != saved {
            if let Err(e) = self.inner.progress.save(configured) {
                warn!(error = %e, "failed to persist overridden checkpoint");
            }
            configured
        } else if saved > 0 {
            saved + 1
        } else {
            configured
        }
    }

    async fn forward_boundary(&self, id: i32, cancel: &CancellationToken) {
        if cancel.is_cancelled() || !self.is_running().await {
            return;
        }
        match self.inner.channel.forward(MessageId(id)).await {
            Ok(ForwardOutcome::Forwarded) => {
                self.checkpoint(id);
                self.pace(cancel).await;
            }
            Ok(outcome) => {
                warn!(id, ?outcome, "boundary message not forwarded");
            }
            Err(e) => {
                warn!(id, error = %e, "boundary forward failed");
            }
        }
    }

    fn checkpoint(&self, id: i32) {
        info!(id, "forwarded");
        if let Err(e) = self.inner.progress.save(id) {
            warn!(id, error = %e, "checkpoint write failed");
        }
    }

    /// Pacing delay between sends; interruptible so /off takes effect
    /// without waiting out the interval.
    async fn pace(&self, cancel: &CancellationToken) {
        let minutes = {
            let st = self.inner.state.lock().await;
            st.interval_minutes
        };
        tokio::select! {
          _ = cancel.cancelled() => {}
          _ = sleep(Duration::from_secs(minutes.saturating_mul(60))) => {}
        }
    }

    async fn is_running(&self) -> bool {
        self.inner.state.lock().await.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChatId, UserId};
    use crate::Result;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeChannel {
        outcomes: StdMutex<HashMap<i32, ForwardOutcome>>,
        errors: StdMutex<HashSet<i32>>,
        attempts: StdMutex<Vec<i32>>,
    }

    impl FakeChannel {
        fn with_forwardable(ids: impl IntoIterator<Item = i32>) -> Arc<Self> {
            let fake = Self::default();
            {
                let mut outcomes = fake.outcomes.lock().unwrap();
                for id in ids {
                    outcomes.insert(id, ForwardOutcome::Forwarded);
                }
            }
            Arc::new(fake)
        }

        fn set_outcome(&self, id: i32, outcome: ForwardOutcome) {
            self.outcomes.lock().unwrap().insert(id, outcome);
        }

        fn fail_on(&self, id: i32) {
            self.errors.lock().unwrap().insert(id);
        }

        fn attempts(&self) -> Vec<i32> {
            self.attempts.lock().unwrap().clone()
        }

        fn forwarded(&self) -> Vec<i32> {
            let outcomes = self.outcomes.lock().unwrap();
            self.attempts
                .lock()
                .unwrap()
                .iter()
                .copied()
                .filter(|id| outcomes.get(id) == Some(&ForwardOutcome::Forwarded))
                .collect()
        }
    }

    #[async_trait]
    impl ChannelPort for FakeChannel {
        async fn forward(&self, id: MessageId) -> Result<ForwardOutcome> {
            self.attempts.lock().unwrap().push(id.0);
            if self.errors.lock().unwrap().contains(&id.0) {
                return Err(crate::Error::Channel("simulated failure".to_string()));
            }
            Ok(self
                .outcomes
                .lock()
                .unwrap()
                .get(&id.0)
                .copied()
                .unwrap_or(ForwardOutcome::Missing))
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let root = PathBuf::from(format!("/tmp/tgfwd-relay-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    fn test_service(
        name: &str,
        start_from_id: i32,
        interval_minutes: u64,
        channel: Arc<FakeChannel>,
    ) -> (RelayService, ProgressStore, PathBuf) {
        let root = scratch_dir(name);
        let cfg = Config {
            telegram_bot_token: "x".to_string(),
            source_channel: ChatId(-1001),
            target_channel: "@target".to_string(),
            owner_id: UserId(1),
            start_from_id,
            forward_interval_minutes: interval_minutes,
            progress_file: root.join("progress.json"),
            env_file: root.join(".env"),
        };
        let progress = ProgressStore::new(cfg.progress_file.clone());
        let env_file = cfg.env_file.clone();
        (RelayService::new(&cfg, channel), progress, env_file)
    }

    async fn wait_until_idle(service: &RelayService) {
        for _ in 0..200 {
            if !service.status().await.running {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("relay did not become idle in time");
    }

    async fn wait_for_attempts(channel: &FakeChannel, at_least: usize) {
        for _ in 0..200 {
            if channel.attempts().len() >= at_least {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("expected at least {at_least} forward attempts");
    }

    #[tokio::test]
    async fn checkpoint_tracks_last_forwarded_and_restart_is_accepted() {
        let channel = FakeChannel::with_forwardable(1..=5);
        let (service, progress, _) = test_service("full-run", 1, 0, channel.clone());

        let reply = service.handle_command(Command::On).await;
        assert!(reply.contains("started"), "got: {reply}");
        wait_until_idle(&service).await;

        assert_eq!(channel.forwarded(), vec![1, 2, 3, 4, 5]);
        assert_eq!(progress.load(), 5);

        // Cleanup ran on normal completion, so a new start is accepted.
        let reply = service.handle_command(Command::On).await;
        assert!(reply.contains("started"), "got: {reply}");
        wait_until_idle(&service).await;
    }

    #[tokio::test]
    async fn resumes_strictly_after_checkpoint() {
        let channel = FakeChannel::with_forwardable(43..=44);
        let (service, progress, _) = test_service("resume", 0, 0, channel.clone());
        progress.save(42).unwrap();

        service.handle_command(Command::On).await;
        wait_until_idle(&service).await;

        assert_eq!(channel.attempts().first(), Some(&43));
        assert_eq!(progress.load(), 44);
    }

    #[tokio::test]
    async fn operator_override_rewrites_checkpoint_immediately() {
        let channel = Arc::new(FakeChannel::default()); // everything missing
        let (service, progress, _) = test_service("override", 100, 0, channel.clone());
        progress.save(42).unwrap();

        service.handle_command(Command::On).await;
        wait_until_idle(&service).await;

        assert_eq!(channel.attempts().first(), Some(&100));
        assert_eq!(progress.load(), 100);
    }

    #[tokio::test]
    async fn zero_start_with_no_checkpoint_begins_at_zero() {
        let channel = Arc::new(FakeChannel::default());
        let (service, _, _) = test_service("fresh", 0, 0, channel.clone());

        service.handle_command(Command::On).await;
        wait_until_idle(&service).await;

        assert_eq!(channel.attempts().first(), Some(&0));
    }

    #[tokio::test]
    async fn stop_during_pacing_halts_without_further_forwards() {
        let channel = FakeChannel::with_forwardable(1..=10);
        let (service, _, _) = test_service("stop-pacing", 1, 1, channel.clone());

        service.handle_command(Command::On).await;
        wait_for_attempts(&channel, 1).await;

        // The loop is now in its 60s pacing sleep; /off must interrupt it.
        let reply = service.handle_command(Command::Off).await;
        assert!(reply.contains("stopped"), "got: {reply}");
        wait_until_idle(&service).await;

        assert_eq!(channel.forwarded(), vec![1]);
        let status = service.status().await;
        assert!(!status.running);
        assert!(status.started_at.is_none());
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let channel = FakeChannel::with_forwardable(1..=10);
        let (service, _, _) = test_service("double-start", 1, 1, channel.clone());

        service.handle_command(Command::On).await;
        wait_for_attempts(&channel, 1).await;

        let reply = service.handle_command(Command::On).await;
        assert!(reply.contains("Already running"), "got: {reply}");

        service.handle_command(Command::Off).await;
        wait_until_idle(&service).await;
    }

    #[tokio::test]
    async fn stop_when_idle_is_rejected() {
        let channel = Arc::new(FakeChannel::default());
        let (service, _, _) = test_service("idle-stop", 0, 0, channel);

        let reply = service.handle_command(Command::Off).await;
        assert!(reply.contains("Already stopped"), "got: {reply}");
    }

    #[tokio::test]
    async fn set_interval_updates_state_and_env_file() {
        let channel = Arc::new(FakeChannel::default());
        let (service, _, env_file) = test_service("interval", 0, 10, channel);
        std::fs::write(&env_file, "FORWARD_INTERVAL_MINUTES=10\n").unwrap();

        let reply = service.handle_command(Command::SetInterval(5)).await;
        assert!(reply.contains("5 minute"), "got: {reply}");

        assert_eq!(service.status().await.interval_minutes, 5);
        let contents = std::fs::read_to_string(&env_file).unwrap();
        assert_eq!(contents, "FORWARD_INTERVAL_MINUTES=5\n");
    }

    #[tokio::test]
    async fn start_id_from_link_persists_to_both_stores() {
        let channel = Arc::new(FakeChannel::default());
        let (service, progress, env_file) = test_service("link", 0, 10, channel);
        std::fs::write(&env_file, "").unwrap();

        service.handle_command(Command::StartFromLink(5678)).await;

        assert_eq!(service.status().await.start_from_id, 5678);
        assert_eq!(progress.load(), 5678);
        let contents = std::fs::read_to_string(&env_file).unwrap();
        assert!(contents.contains("START_FROM_ID=5678"), "got: {contents}");
    }

    #[tokio::test]
    async fn malformed_setting_changes_nothing() {
        let channel = Arc::new(FakeChannel::default());
        let (service, _, _) = test_service("bad-setting", 7, 10, channel);

        let reply = service.handle_command(Command::BadSetting).await;
        assert!(reply.contains("/setting <minutes>"), "got: {reply}");

        let status = service.status().await;
        assert_eq!(status.interval_minutes, 10);
        assert_eq!(status.start_from_id, 7);
    }

    #[tokio::test]
    async fn service_messages_are_skipped_without_checkpoint() {
        let channel = FakeChannel::with_forwardable([1, 3]);
        channel.set_outcome(2, ForwardOutcome::NotForwardable);
        let (service, progress, _) = test_service("service-skip", 1, 0, channel.clone());

        service.handle_command(Command::On).await;
        wait_until_idle(&service).await;

        assert_eq!(channel.forwarded(), vec![1, 3]);
        assert_eq!(progress.load(), 3);
    }

    #[tokio::test]
    async fn forward_error_skips_message_and_continues() {
        let channel = FakeChannel::with_forwardable([1, 3]);
        channel.fail_on(2);
        let (service, progress, _) = test_service("error-skip", 1, 0, channel.clone());

        service.handle_command(Command::On).await;
        wait_until_idle(&service).await;

        // Id 2 failed once, was never retried, and the run moved past it.
        assert_eq!(channel.attempts().iter().filter(|&&id| id == 2).count(), 1);
        assert_eq!(channel.forwarded(), vec![1, 3]);
        assert_eq!(progress.load(), 3);
    }

    #[tokio::test]
    async fn boundary_failure_does_not_abort_the_run() {
        let channel = FakeChannel::with_forwardable(2..=3);
        let (service, progress, _) = test_service("boundary-miss", 1, 0, channel.clone());

        service.handle_command(Command::On).await;
        wait_until_idle(&service).await;

        // Boundary id 1 is missing; enumeration still forwarded the rest.
        assert_eq!(channel.forwarded(), vec![2, 3]);
        assert_eq!(progress.load(), 3);
    }

    #[tokio::test]
    async fn pacing_survives_huge_intervals() {
        let channel = Arc::new(FakeChannel::default());
        let (service, _, _) = test_service("huge-interval", 0, u64::MAX, channel);

        // Computing the delay must not overflow; an already-cancelled token
        // makes the select return immediately.
        let cancel = CancellationToken::new();
        cancel.cancel();
        service.pace(&cancel).await;
    }

    #[tokio::test]
    async fn status_reports_all_fields() {
        let channel = Arc::new(FakeChannel::default());
        let (service, progress, _) = test_service("status", 9, 15, channel);
        progress.save(4).unwrap();

        let text = service.handle_command(Command::Status).await;
        assert!(text.contains("Stopped"), "got: {text}");
        assert!(text.contains("15 minute"), "got: {text}");
        assert!(text.contains("Start from id: 9"), "got: {text}");
        assert!(text.contains("Last forwarded id: 4"), "got: {text}");
    }
}
