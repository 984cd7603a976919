use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

/// Playback state of the external read-aloud engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// External text-to-speech engine.
///
/// The engine owns its own state and publishes it through the two watch
/// streams; `subscribe_*` may be called any number of times. A `None` title
/// means no player surface should be shown.
#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    /// Starts speaking `body` under the given display title.
    async fn speak(&self, title: &str, body: &str);

    fn pause(&self);

    fn stop(&self);

    /// Releases the engine. Called once when the owning engine shuts down.
    fn shutdown(&self);

    fn subscribe_title(&self) -> watch::Receiver<Option<String>>;

    fn subscribe_status(&self) -> watch::Receiver<PlaybackStatus>;
}

/// Wraps the playback engine with the idempotence the callers rely on:
/// pause and stop check the engine's own published status first, so calling
/// them on an already paused or stopped engine does nothing.
pub(crate) struct ReadAloudController {
    engine: Arc<dyn PlaybackEngine>,
    status: watch::Receiver<PlaybackStatus>,
    title: watch::Receiver<Option<String>>,
}

impl ReadAloudController {
    pub(crate) fn new(engine: Arc<dyn PlaybackEngine>) -> Self {
        let status = engine.subscribe_status();
        let title = engine.subscribe_title();
        Self {
            engine,
            status,
            title,
        }
    }

    pub(crate) async fn play(&self, title: &str, body: &str) {
        self.engine.speak(title, body).await;
    }

    pub(crate) fn pause(&self) {
        if *self.status.borrow() == PlaybackStatus::Playing {
            self.engine.pause();
        }
    }

    pub(crate) fn stop(&self) {
        if *self.status.borrow() != PlaybackStatus::Stopped {
            self.engine.stop();
        }
    }

    pub(crate) fn shutdown(&self) {
        self.engine.shutdown();
    }

    pub(crate) fn status(&self) -> PlaybackStatus {
        *self.status.borrow()
    }

    pub(crate) fn title(&self) -> Option<String> {
        self.title.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubPlayback {
        status: watch::Sender<PlaybackStatus>,
        title: watch::Sender<Option<String>>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl StubPlayback {
        fn new() -> Self {
            Self {
                status: watch::Sender::new(PlaybackStatus::Stopped),
                title: watch::Sender::new(None),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlaybackEngine for StubPlayback {
        async fn speak(&self, title: &str, _body: &str) {
            self.calls.lock().unwrap().push("speak");
            let _ = self.title.send(Some(title.to_owned()));
            let _ = self.status.send(PlaybackStatus::Playing);
        }

        fn pause(&self) {
            self.calls.lock().unwrap().push("pause");
            let _ = self.status.send(PlaybackStatus::Paused);
        }

        fn stop(&self) {
            self.calls.lock().unwrap().push("stop");
            let _ = self.title.send(None);
            let _ = self.status.send(PlaybackStatus::Stopped);
        }

        fn shutdown(&self) {
            self.calls.lock().unwrap().push("shutdown");
        }

        fn subscribe_title(&self) -> watch::Receiver<Option<String>> {
            self.title.subscribe()
        }

        fn subscribe_status(&self) -> watch::Receiver<PlaybackStatus> {
            self.status.subscribe()
        }
    }

    #[tokio::test]
    async fn test_play_reaches_engine_and_updates_streams() {
        let stub = Arc::new(StubPlayback::new());
        let controller = ReadAloudController::new(stub.clone());

        controller.play("Title", "Body text").await;

        assert_eq!(stub.calls(), vec!["speak"]);
        assert_eq!(controller.status(), PlaybackStatus::Playing);
        assert_eq!(controller.title().as_deref(), Some("Title"));
    }

    #[tokio::test]
    async fn test_stop_twice_reaches_engine_once() {
        let stub = Arc::new(StubPlayback::new());
        let controller = ReadAloudController::new(stub.clone());
        controller.play("Title", "Body").await;

        controller.stop();
        controller.stop();

        assert_eq!(stub.calls(), vec!["speak", "stop"]);
        assert_eq!(controller.status(), PlaybackStatus::Stopped);
        assert_eq!(controller.title(), None);
    }

    #[tokio::test]
    async fn test_pause_on_stopped_engine_is_a_no_op() {
        let stub = Arc::new(StubPlayback::new());
        let controller = ReadAloudController::new(stub.clone());

        controller.pause();

        assert!(stub.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pause_only_pauses_playing_engine() {
        let stub = Arc::new(StubPlayback::new());
        let controller = ReadAloudController::new(stub.clone());
        controller.play("Title", "Body").await;

        controller.pause();
        controller.pause();

        assert_eq!(stub.calls(), vec!["speak", "pause"]);
        assert_eq!(controller.status(), PlaybackStatus::Paused);
    }
}
