use droplet_core::OwnerRef;
use droplet_syncer::{EventSink, EventType};
use kube::runtime::events::{Event, EventType as KubeEventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

const NOTE_MAX: usize = 1024;

/// Publishes `events.k8s.io/v1` events on the owning parent.
///
/// Each event is published on its own task so `record` never waits on the API
/// server. Publish failures are logged and dropped.
#[derive(Clone)]
pub struct KubeEventSink {
    client: Client,
    reporter: Reporter,
}

impl KubeEventSink {
    pub fn new(client: Client, controller: impl Into<String>) -> Self {
        let instance = std::env::var("POD_NAME").ok();
        Self { client, reporter: Reporter { controller: controller.into(), instance } }
    }
}

impl EventSink for KubeEventSink {
    fn record(&self, owner: &OwnerRef, type_: EventType, reason: &str, message: &str) {
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            warn!(reason, "events: no runtime; dropped");
            return;
        };
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), owner.object_reference());
        let event = Event {
            type_: match type_ {
                EventType::Normal => KubeEventType::Normal,
                EventType::Warning => KubeEventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(truncate(message, NOTE_MAX).to_string()),
            action: "Sync".into(),
            secondary: None,
        };
        let owner = format!("{}/{}", owner.kind, owner.name);
        rt.spawn(async move {
            if let Err(e) = recorder.publish(event).await {
                warn!(owner = %owner, error = %e, "events: publish failed");
            }
        });
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::truncate;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abcdef", 3), "abc");
    }
}
