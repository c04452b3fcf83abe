//! Display and client lifecycle through the bridge

mod common;

use common::*;
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use westfield_native::*;

// ============================================================================
// CLIENT CREATION
// ============================================================================

#[test]
fn test_client_created_fires_once_with_live_handle() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let harness = {
        let events = Rc::clone(&events);
        Harness::with_callback(move |ctx, client| {
            events.borrow_mut().push((ctx.event(), client.is_alive()));
        })
    };

    let (_stream, client) = harness.connect_client();
    for _ in 0..3 {
        harness.display.dispatch_requests().unwrap();
    }

    assert_eq!(*events.borrow(), vec![(CallbackEvent::ClientCreated, true)]);
    assert_eq!(client.id(), ClientId::new(1));
    assert_eq!(harness.display.client_count(), 1);
    assert_eq!(harness.display.clients(), vec![client]);
}

#[test]
fn test_created_callback_runs_before_any_wire_message() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let harness = {
        let log = Rc::clone(&log);
        Harness::with_callback(move |_, client| {
            log.borrow_mut().push("created");
            let log = Rc::clone(&log);
            client.set_wire_message_callback(Rc::new(
                move |_: &CallContext<'_>, _: &ClientHandle, message: &WireMessage<'_>| {
                    log.borrow_mut().push("wire");
                    message.len()
                },
            ));
        })
    };

    // Bytes are already queued when the client is accepted
    let stream = harness.connect();
    (&stream).write_all(&frame(1, 0, &[])).unwrap();
    harness.pump_until(|| log.borrow().len() == 2);

    assert_eq!(*log.borrow(), vec!["created", "wire"]);
}

// ============================================================================
// CALLBACK REFERENCES
// ============================================================================

#[test]
fn test_replacing_destroy_callback_releases_previous_immediately() {
    let harness = Harness::new();
    let (_stream, client) = harness.connect_client();
    let first_alive = Rc::new(());
    let second_alive = Rc::new(());

    {
        let token = Rc::clone(&first_alive);
        client.set_destroyed_callback(Rc::new(move |_: &CallContext<'_>, _: &ClientHandle| {
            let _keep = &token;
        }));
    }
    assert_eq!(Rc::strong_count(&first_alive), 2);

    {
        let token = Rc::clone(&second_alive);
        client.set_destroyed_callback(Rc::new(move |_: &CallContext<'_>, _: &ClientHandle| {
            let _keep = &token;
        }));
    }
    assert_eq!(Rc::strong_count(&first_alive), 1);
    assert_eq!(Rc::strong_count(&second_alive), 2);

    client.destroy();
    assert_eq!(Rc::strong_count(&second_alive), 1);
}

#[test]
fn test_destroy_callback_released_exactly_at_destroy() {
    let harness = Harness::new();
    let (_stream, client) = harness.connect_client();
    let token = Rc::new(());
    let calls = Rc::new(RefCell::new(0));
    {
        let token = Rc::clone(&token);
        let calls = Rc::clone(&calls);
        client.set_destroyed_callback(Rc::new(move |_: &CallContext<'_>, handle: &ClientHandle| {
            let _keep = &token;
            // Still usable while being notified
            assert!(handle.is_alive());
            *calls.borrow_mut() += 1;
        }));
    }

    harness.display.dispatch_requests().unwrap();
    assert_eq!(Rc::strong_count(&token), 2);

    client.destroy();
    assert_eq!(*calls.borrow(), 1);
    assert_eq!(Rc::strong_count(&token), 1);
    assert!(!client.is_alive());

    // Destroying an already destroyed client through the engine is a no-op
    harness.display.flush_events();
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn test_destroy_without_callbacks_frees_record() {
    let harness = Harness::new();
    let registry = harness.display.registry().clone();
    let baseline = registry.live_references();

    let (_stream, client) = harness.connect_client();
    assert_eq!(registry.live_references(), baseline + 1);

    client.destroy();

    assert_eq!(harness.display.client_count(), 0);
    assert_eq!(registry.live_references(), baseline);
    assert!(!client.is_alive());
}

#[test]
#[should_panic(expected = "used after it was destroyed")]
fn test_handle_use_after_destroy_panics() {
    let harness = Harness::new();
    let (_stream, client) = harness.connect_client();
    client.destroy();
    client.send_events(b"late", &[]);
}

// ============================================================================
// DESTROY PATHS
// ============================================================================

#[test]
fn test_display_destroy_notifies_clients_first() {
    let harness = Harness::new();
    let registry = harness.display.registry().clone();
    let log = Rc::new(RefCell::new(Vec::new()));

    let (_s1, c1) = harness.connect_client();
    let (_s2, c2) = harness.connect_client();
    c1.set_destroyed_callback(recording_destroy_callback(&log));
    c2.set_destroyed_callback(recording_destroy_callback(&log));

    let Harness { display, .. } = harness;
    display.destroy();

    let teardown = CallbackEvent::ClientDestroyed(DisconnectReason::DisplayTeardown);
    assert_eq!(
        *log.borrow(),
        vec![(ClientId::new(1), teardown), (ClientId::new(2), teardown)]
    );
    // Client records and the created callback are all gone
    assert_eq!(registry.live_references(), 0);
    assert_eq!(registry.stats().live(), 0);
}

#[test]
fn test_dropping_display_handle_tears_down() {
    let harness = Harness::new();
    let registry = harness.display.registry().clone();
    let log = Rc::new(RefCell::new(Vec::new()));
    let (_stream, client) = harness.connect_client();
    client.set_destroyed_callback(recording_destroy_callback(&log));

    drop(harness);

    assert_eq!(log.borrow().len(), 1);
    assert_eq!(registry.live_references(), 0);
}

#[test]
fn test_every_destroy_path_has_context() {
    let harness = Harness::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let registries_seen = Rc::new(RefCell::new(Vec::new()));
    let callback: Rc<ClientDestroyedCallback> = {
        let log = Rc::clone(&log);
        let seen = Rc::clone(&registries_seen);
        Rc::new(move |ctx: &CallContext<'_>, client: &ClientHandle| {
            log.borrow_mut().push((client.id(), ctx.event()));
            seen.borrow_mut().push(ctx.registry().live_references());
        })
    };

    // Peer hang-up
    let (stream, peer_closed) = harness.connect_client();
    peer_closed.set_destroyed_callback(Rc::clone(&callback));
    drop(stream);
    harness.pump_until(|| !peer_closed.is_alive());

    // Explicit destroy
    let (_stream, destroyed) = harness.connect_client();
    destroyed.set_destroyed_callback(Rc::clone(&callback));
    destroyed.destroy();

    // Broken connection found on flush
    let (_stream, broken) = harness.connect_client();
    broken.set_destroyed_callback(Rc::clone(&callback));
    broken.send_events(b"event", &fd_bytes(&[-1]));
    harness.display.flush_events();

    // Display teardown
    let (_stream, torn_down) = harness.connect_client();
    torn_down.set_destroyed_callback(Rc::clone(&callback));
    let Harness { display, .. } = harness;
    display.destroy();

    assert_eq!(
        *log.borrow(),
        vec![
            (
                peer_closed.id(),
                CallbackEvent::ClientDestroyed(DisconnectReason::PeerClosed)
            ),
            (
                destroyed.id(),
                CallbackEvent::ClientDestroyed(DisconnectReason::Destroyed)
            ),
            (
                broken.id(),
                CallbackEvent::ClientDestroyed(DisconnectReason::ConnectionError)
            ),
            (
                torn_down.id(),
                CallbackEvent::ClientDestroyed(DisconnectReason::DisplayTeardown)
            ),
        ]
    );
    assert!(registries_seen.borrow().iter().all(|live| *live > 0));
}

// ============================================================================
// DISPLAY OPERATIONS
// ============================================================================

#[test]
fn test_socket_and_fd() {
    let harness = Harness::new();
    assert_eq!(harness.socket, "wayland-0");
    assert_eq!(harness.display.socket_names(), vec!["wayland-0"]);
    assert!(harness.display.fd() >= 0);

    harness.display.add_socket("custom-display").unwrap();
    assert!(harness.dir.path().join("custom-display").exists());
}

#[test]
fn test_init_shm() {
    let harness = Harness::new();
    harness.display.init_shm();
    assert_eq!(
        harness.display.shm_formats(),
        vec![ShmFormat::ARGB8888, ShmFormat::XRGB8888]
    );
}
