#![cfg(loom)]
//! Model-checked close races on `SocketSlot`.

use fabriclink::{GracefulClose, SocketSlot};
use loom::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

#[derive(Clone, Default)]
struct CountingSocket {
    closes: Arc<AtomicUsize>,
}

impl GracefulClose for CountingSocket {
    fn shutdown_both(&self) { self.closes.fetch_add(1, Ordering::SeqCst); }
}

#[test]
fn concurrent_close_shuts_down_once() {
    loom::model(|| {
        let socket = CountingSocket::default();
        let slot = Arc::new(SocketSlot::new(socket.clone()));

        let other = Arc::clone(&slot);
        let handle = thread::spawn(move || other.close());
        let mine = slot.close();
        let theirs = handle.join().expect("join");

        assert!(mine ^ theirs, "exactly one close must win");
        assert!(!slot.is_open());
        assert_eq!(socket.closes.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn get_races_with_close() {
    loom::model(|| {
        let slot = Arc::new(SocketSlot::new(CountingSocket::default()));
        let other = Arc::clone(&slot);
        let handle = thread::spawn(move || other.get().is_some());
        assert!(slot.close());
        let _ = handle.join().expect("join");
        assert!(slot.get().is_none());
    });
}
