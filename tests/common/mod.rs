#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use turnstile::{
    ManualClock, RecordingNotifier, RequestParts, Rule, RuleSource, Turnstile, TurnstileConfig,
};

/// A turnstile on a hand-driven clock with alerts kept in memory.
pub struct Harness {
    pub turnstile: Turnstile,
    pub clock: ManualClock,
    pub alerts: RecordingNotifier,
}

pub fn harness(config: TurnstileConfig, rules: Arc<dyn RuleSource>) -> Harness {
    let clock = ManualClock::new();
    let alerts = RecordingNotifier::new();
    let turnstile =
        Turnstile::with_parts(config, rules, Arc::new(clock.clone()), Arc::new(alerts.clone()))
            .expect("valid config");
    Harness { turnstile, clock, alerts }
}

pub fn harness_with_rules(rules: impl IntoIterator<Item = Rule>) -> Harness {
    let source: turnstile::InMemoryRuleSource = rules.into_iter().collect();
    harness(TurnstileConfig::default(), Arc::new(source))
}

pub fn client(endpoint: &str, ip: &str) -> RequestParts {
    RequestParts::new(endpoint, format!("/{}", endpoint.replace(' ', "/"))).with_remote_addr(ip)
}

#[derive(Clone)]
pub struct SharedWriter(pub Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

pub struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a subscriber capturing everything at `level` and above; returns the output.
pub fn capture_logs(level: tracing::Level, f: impl FnOnce()) -> String {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
        .with_max_level(level)
        .with_target(true)
        .without_time()
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.lock().unwrap().clone();
    String::from_utf8(bytes).unwrap()
}
