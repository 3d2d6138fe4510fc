//! Unit tests for the message hub.

use std::sync::{Arc, Mutex};
use std::thread;

use rstest::{fixture, rstest};

use super::*;
use crate::message::Channel;

type Log = Arc<Mutex<Vec<String>>>;

#[fixture]
fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn recorder(log: &Log, label: &'static str) -> impl Fn(&Message) + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |message: &Message| {
        log.lock()
            .expect("log lock")
            .push(format!("{label}:{}", message.text()));
    }
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().expect("log lock").clone()
}

#[rstest]
fn delivers_to_subscribers_in_registration_order(log: Log) {
    let hub = MessageHub::new();
    hub.subscribe(recorder(&log, "first"));
    hub.subscribe(recorder(&log, "second"));

    hub.emit(Message::new(Channel::Information, "a"));
    hub.emit(Message::new(Channel::Information, "b"));

    assert_eq!(
        entries(&log),
        vec!["first:a", "second:a", "first:b", "second:b"]
    );
}

#[rstest]
fn unsubscribed_observer_stops_receiving(log: Log) {
    let hub = MessageHub::new();
    let first = hub.subscribe(recorder(&log, "first"));
    hub.subscribe(recorder(&log, "second"));

    hub.emit(Message::new(Channel::Warning, "a"));
    assert!(hub.unsubscribe(first));
    hub.emit(Message::new(Channel::Warning, "b"));

    assert_eq!(entries(&log), vec!["first:a", "second:a", "second:b"]);
    assert_eq!(hub.subscriber_count(), 1);
}

#[rstest]
fn unsubscribing_twice_reports_missing() {
    let hub = MessageHub::new();
    let id = hub.subscribe(|_: &Message| {});

    assert!(hub.unsubscribe(id));
    assert!(!hub.unsubscribe(id));
}

#[rstest]
fn observer_may_unsubscribe_itself_mid_delivery(log: Log) {
    let hub = MessageHub::new();
    let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

    let hub_clone = hub.clone();
    let slot_clone = Arc::clone(&slot);
    let inner_log = Arc::clone(&log);
    let id = hub.subscribe(move |message: &Message| {
        inner_log
            .lock()
            .expect("log lock")
            .push(format!("once:{}", message.text()));
        if let Some(own) = slot_clone.lock().expect("slot lock").take() {
            hub_clone.unsubscribe(own);
        }
    });
    *slot.lock().expect("slot lock") = Some(id);
    hub.subscribe(recorder(&log, "steady"));

    hub.emit(Message::new(Channel::Debug, "a"));
    hub.emit(Message::new(Channel::Debug, "b"));

    assert_eq!(entries(&log), vec!["once:a", "steady:a", "steady:b"]);
}

#[rstest]
fn reentrant_emit_is_queued_behind_current_message(log: Log) {
    let hub = MessageHub::new();
    let hub_clone = hub.clone();
    hub.subscribe(move |message: &Message| {
        if message.text() == "outer" {
            hub_clone.emit(Message::new(Channel::Verbose, "inner"));
        }
    });
    hub.subscribe(recorder(&log, "seen"));

    hub.emit(Message::new(Channel::Verbose, "outer"));

    assert_eq!(entries(&log), vec!["seen:outer", "seen:inner"]);
}

#[rstest]
fn concurrent_emitters_yield_one_global_order(log: Log) {
    let hub = MessageHub::new();
    hub.subscribe(recorder(&log, "a"));
    hub.subscribe(recorder(&log, "b"));

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let hub = hub.clone();
            thread::spawn(move || {
                for index in 0..50 {
                    hub.emit(Message::new(Channel::Information, format!("{worker}-{index}")));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread");
    }

    let seen = entries(&log);
    assert_eq!(seen.len(), 400);
    let order_a: Vec<&str> = seen.iter().filter_map(|e| e.strip_prefix("a:")).collect();
    let order_b: Vec<&str> = seen.iter().filter_map(|e| e.strip_prefix("b:")).collect();
    assert_eq!(order_a, order_b, "observers disagree on message order");
}
