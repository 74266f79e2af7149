use std::{
    sync::{
        Arc,
        mpsc::{self, RecvTimeoutError, Sender},
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use log::{debug, info, warn};

use crate::nowplaying::NowPlaying;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    /// a consumer started showing now-playing data
    Attach,
    /// a consumer went away (hidden tab, closed connection)
    Detach,
    /// poll now, regardless of the timer
    Refresh,
    Shutdown,
}

/// Handle to the poll loop thread.
///
/// The loop polls only while at least one consumer is attached.
/// Going from zero to one consumer triggers an immediate poll instead of waiting for the next tick.
pub struct Poller {
    tx: Sender<Control>,
    thread: Option<JoinHandle<()>>,
}

impl Poller {
    pub fn spawn(now_playing: Arc<NowPlaying>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("now-playing-poller".into())
            .spawn(move || run(now_playing, rx))?;
        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    pub fn attach(&self) {
        self.send(Control::Attach);
    }

    pub fn detach(&self) {
        self.send(Control::Detach);
    }

    pub fn refresh(&self) {
        self.send(Control::Refresh);
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn send(&self, control: Control) {
        if self.tx.send(control).is_err() {
            warn!("poller is not running, dropping {:?}", control);
        }
    }

    fn stop(&mut self) {
        let _ = self.tx.send(Control::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("poller thread panicked");
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(now_playing: Arc<NowPlaying>, rx: mpsc::Receiver<Control>) {
    let interval = now_playing.policy().poll_interval;
    let mut consumers: usize = 0;
    let mut next_poll = Instant::now() + interval;

    loop {
        let control = if consumers > 0 {
            match rx.recv_timeout(next_poll.saturating_duration_since(Instant::now())) {
                Ok(control) => Some(control),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            // detached: block until someone attaches
            match rx.recv() {
                Ok(control) => Some(control),
                Err(_) => break,
            }
        };

        let poll_now = match control {
            None => true,
            Some(Control::Attach) => {
                consumers += 1;
                debug!("consumer attached ({} total)", consumers);
                consumers == 1
            }
            Some(Control::Detach) => {
                consumers = consumers.saturating_sub(1);
                debug!("consumer detached ({} left)", consumers);
                if consumers == 0 {
                    info!("no consumers left, polling suspended");
                }
                false
            }
            Some(Control::Refresh) => true,
            Some(Control::Shutdown) => break,
        };

        if poll_now {
            let outcome = now_playing.poll_once();
            debug!("poll finished: {:?}", outcome);
            next_poll = Instant::now() + interval;
        }
    }

    info!("poller stopped");
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use serde_json::{Value, json};

    use super::*;
    use crate::nowplaying::{
        artwork::{ArtworkCache, ArtworkResolver},
        error::SyncError,
        fetcher::{Fetcher, MetadataSource},
        history::PlayHistory,
        lookup::NoLookup,
        policy::RevalidationPolicy,
        tests::test_policy,
    };

    struct CountingSource(Arc<AtomicUsize>);

    impl MetadataSource for CountingSource {
        fn fetch_raw(&self) -> Result<Value, SyncError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({ "artist": "Artist", "title": format!("Song {n}") }))
        }
    }

    fn poller(interval: Duration) -> (Poller, Arc<NowPlaying>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = Fetcher::new(Box::new(CountingSource(Arc::clone(&calls))), "Example FM");
        let resolver = ArtworkResolver::new(
            Box::new(NoLookup),
            ArtworkCache::new(4, None),
            None,
            Duration::ZERO,
        );
        let policy = RevalidationPolicy {
            poll_interval: interval,
            ..test_policy()
        };
        let now_playing = Arc::new(NowPlaying::new(
            Arc::new(fetcher),
            resolver,
            PlayHistory::new(10),
            policy,
            None,
        ));
        let poller = Poller::spawn(Arc::clone(&now_playing)).unwrap();
        (poller, now_playing, calls)
    }

    #[test]
    fn test_detached_poller_does_not_poll() {
        let (poller, _, calls) = poller(Duration::from_millis(10));

        thread::sleep(Duration::from_millis(80));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        poller.shutdown();
    }

    #[test]
    fn test_attach_polls_immediately() {
        let (poller, now_playing, calls) = poller(Duration::from_secs(3600));
        let rx = now_playing.holder().subscribe();

        poller.attach();
        let state = rx.recv_timeout(Duration::from_secs(2)).unwrap();

        assert_eq!(state.current_track.as_ref().unwrap().title, "Song 1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        poller.shutdown();
    }

    #[test]
    fn test_reattach_polls_again_without_waiting_for_tick() {
        let (poller, now_playing, calls) = poller(Duration::from_secs(3600));
        let rx = now_playing.holder().subscribe();

        poller.attach();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        poller.detach();
        poller.attach();
        let state = rx.recv_timeout(Duration::from_secs(2)).unwrap();

        assert_eq!(state.current_track.as_ref().unwrap().title, "Song 2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        poller.shutdown();
    }

    #[test]
    fn test_second_consumer_does_not_force_poll() {
        let (poller, now_playing, calls) = poller(Duration::from_secs(3600));
        let rx = now_playing.holder().subscribe();

        poller.attach();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        poller.attach();
        thread::sleep(Duration::from_millis(50));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        poller.shutdown();
    }

    #[test]
    fn test_attached_poller_polls_on_interval() {
        let (poller, _, calls) = poller(Duration::from_millis(20));

        poller.attach();
        thread::sleep(Duration::from_millis(200));
        poller.detach();
        thread::sleep(Duration::from_millis(50));
        let after_detach = calls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));

        assert!(after_detach >= 3, "only {after_detach} polls");
        assert_eq!(calls.load(Ordering::SeqCst), after_detach);
        poller.shutdown();
    }

    #[test]
    fn test_refresh_polls_while_detached() {
        let (poller, now_playing, calls) = poller(Duration::from_secs(3600));
        let rx = now_playing.holder().subscribe();

        poller.refresh();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        poller.shutdown();
    }
}
