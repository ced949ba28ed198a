//! Three-level locks taken by real workers.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{wait_until, Gate, Harness, Trace};
use zos_vfsd::{
    call, status, DispatchTable, Endpoint, LockLevel, Message, Tll, VfsdError, Worker, WorkerId,
};

#[test]
fn test_writer_waits_for_reader_then_runs() {
    let vnode = Arc::new(Tll::new());
    let trace = Trace::new();
    let gate = Gate::new();
    let table = {
        let (v1, v2) = (vnode.clone(), vnode.clone());
        let (t1, t2) = (trace.clone(), trace.clone());
        let gate = gate.clone();
        DispatchTable::new()
            .register(call::VFS_READ, move |w: &mut Worker| {
                let guard = v1.lock(w, LockLevel::Read);
                t1.push("A read");
                gate.wait();
                t1.push("A release");
                guard.unlock();
                status::OK
            })
            .register(call::VFS_WRITE, move |w: &mut Worker| {
                let _guard = v2.lock(w, LockLevel::Write);
                t2.push("B write");
                status::OK
            })
    };
    let harness = Harness::with_workers(2, table);

    harness.call(100, call::VFS_READ);
    wait_until("reader in", || vnode.readers() == 1);
    harness.call(101, call::VFS_WRITE);
    wait_until("writer queued", || vnode.has_pending());
    thread::sleep(Duration::from_millis(20));
    assert_eq!(trace.events(), vec!["A read"]);

    gate.open();
    harness.reply_to(100);
    harness.reply_to(101);
    assert_eq!(trace.events(), vec!["A read", "A release", "B write"]);
    assert!(!vnode.is_locked());
    harness.finish();
}

#[test]
fn test_upgrade_waits_for_reader_to_drain() {
    let vnode = Arc::new(Tll::new());
    let trace = Trace::new();
    let owner_gate = Gate::new();
    let reader_gate = Gate::new();
    let table = {
        let (v1, v2) = (vnode.clone(), vnode.clone());
        let (t1, t2) = (trace.clone(), trace.clone());
        let (owner_gate, reader_gate) = (owner_gate.clone(), reader_gate.clone());
        DispatchTable::new()
            .register(call::VFS_OPEN, move |w: &mut Worker| {
                let mut guard = v1.lock(w, LockLevel::ReadSerialized);
                t1.push("A serialized");
                owner_gate.wait();
                guard.upgrade();
                assert_eq!(guard.level(), LockLevel::Write);
                assert_eq!(v1.readers(), 0);
                t1.push("A write");
                status::OK
            })
            .register(call::VFS_READ, move |w: &mut Worker| {
                let guard = v2.lock(w, LockLevel::Read);
                t2.push("B read");
                reader_gate.wait();
                t2.push("B release");
                drop(guard);
                status::OK
            })
    };
    let harness = Harness::with_workers(2, table);

    harness.call(100, call::VFS_OPEN);
    wait_until("owner in", || vnode.level() == Some(LockLevel::ReadSerialized));
    harness.call(101, call::VFS_READ);
    wait_until("reader admitted", || vnode.readers() == 1);

    owner_gate.open();
    wait_until("upgrade pending", || vnode.is_upgrading());
    thread::sleep(Duration::from_millis(20));
    assert!(!trace.contains("A write"));

    reader_gate.open();
    harness.reply_to(100);
    harness.reply_to(101);
    assert_eq!(
        trace.events(),
        vec!["A serialized", "B read", "B release", "A write"]
    );
    assert!(!vnode.is_locked());
    harness.finish();
}

#[test]
fn test_upgrade_parks_on_the_owners_event() {
    let vnode = Arc::new(Tll::new());
    let reader_gate = Gate::new();
    let table = {
        let (v1, v2) = (vnode.clone(), vnode.clone());
        let reader_gate = reader_gate.clone();
        DispatchTable::new()
            .register(call::VFS_OPEN, move |w: &mut Worker| {
                let mut guard = v1.lock(w, LockLevel::ReadSerialized);
                // The call context stays borrowed across the blocking upgrade
                let reply = &mut w.call_mut().reply;
                reply.push(1);
                guard.upgrade();
                reply.push(2);
                status::OK
            })
            .register(call::VFS_READ, move |w: &mut Worker| {
                let _guard = v2.lock(w, LockLevel::Read);
                reader_gate.wait();
                status::OK
            })
    };
    let harness = Harness::with_workers(2, table);

    harness.call(101, call::VFS_READ);
    wait_until("reader in", || vnode.readers() == 1);
    harness.call(100, call::VFS_OPEN);
    wait_until("upgrade pending", || vnode.is_upgrading());
    assert_eq!(vnode.owner(), Some(WorkerId(1)));

    reader_gate.open();
    let reply = harness.reply_to(100);
    assert_eq!(reply.code, status::OK);
    assert_eq!(reply.payload, vec![1, 2]);
    harness.reply_to(101);
    assert!(!vnode.is_locked());
    harness.finish();
}

#[test]
fn test_downgrade_admits_waiting_reader() {
    let vnode = Arc::new(Tll::new());
    let write_gate = Gate::new();
    let hold_gate = Gate::new();
    let table = {
        let (v1, v2) = (vnode.clone(), vnode.clone());
        let (write_gate, hold_gate) = (write_gate.clone(), hold_gate.clone());
        DispatchTable::new()
            .register(call::VFS_WRITE, move |w: &mut Worker| {
                let mut guard = v1.lock(w, LockLevel::Write);
                write_gate.wait();
                guard.downgrade();
                assert_eq!(guard.level(), LockLevel::ReadSerialized);
                hold_gate.wait();
                status::OK
            })
            .register(call::VFS_READ, move |w: &mut Worker| {
                let _guard = v2.lock(w, LockLevel::Read);
                status::OK
            })
    };
    let harness = Harness::with_workers(2, table);

    harness.call(100, call::VFS_WRITE);
    wait_until("writer in", || vnode.level() == Some(LockLevel::Write));
    harness.call(101, call::VFS_READ);
    wait_until("reader queued", || vnode.has_pending());

    write_gate.open();
    // The reader finishes while the writer still holds read-serialized
    assert_eq!(harness.reply_to(101).code, status::OK);
    assert_eq!(vnode.level(), Some(LockLevel::ReadSerialized));
    assert_eq!(vnode.owner(), Some(WorkerId(0)));

    hold_gate.open();
    harness.reply_to(100);
    assert!(!vnode.is_locked());
    harness.finish();
}

#[test]
fn test_writers_exclude_everyone_under_load() {
    let vnode = Arc::new(Tll::new());
    let readers = Arc::new(AtomicUsize::new(0));
    let writers = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));

    let table = {
        let (v1, v2, v3) = (vnode.clone(), vnode.clone(), vnode.clone());
        let (r1, w1, c1) = (readers.clone(), writers.clone(), conflicts.clone());
        let (r2, w2, c2) = (readers.clone(), writers.clone(), conflicts.clone());
        let (r3, w3, c3) = (readers.clone(), writers.clone(), conflicts.clone());
        DispatchTable::new()
            .register(call::VFS_WRITE, move |w: &mut Worker| {
                let _guard = v1.lock(w, LockLevel::Write);
                if w1.fetch_add(1, Ordering::SeqCst) != 0 || r1.load(Ordering::SeqCst) != 0 {
                    c1.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_micros(200));
                w1.fetch_sub(1, Ordering::SeqCst);
                status::OK
            })
            .register(call::VFS_READ, move |w: &mut Worker| {
                let _guard = v2.lock(w, LockLevel::Read);
                r2.fetch_add(1, Ordering::SeqCst);
                if w2.load(Ordering::SeqCst) != 0 {
                    c2.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_micros(200));
                r2.fetch_sub(1, Ordering::SeqCst);
                status::OK
            })
            .register(call::VFS_OPEN, move |w: &mut Worker| {
                let mut guard = v3.lock(w, LockLevel::ReadSerialized);
                if w3.load(Ordering::SeqCst) != 0 {
                    c3.fetch_add(1, Ordering::SeqCst);
                }
                guard.upgrade();
                if w3.fetch_add(1, Ordering::SeqCst) != 0 || r3.load(Ordering::SeqCst) != 0 {
                    c3.fetch_add(1, Ordering::SeqCst);
                }
                w3.fetch_sub(1, Ordering::SeqCst);
                status::OK
            })
    };
    let harness = Harness::with_workers(6, table);

    let calls = [call::VFS_READ, call::VFS_WRITE, call::VFS_READ, call::VFS_OPEN];
    let clients: Vec<i32> = (100..160).collect();
    for (i, client) in clients.iter().enumerate() {
        harness.call(*client, calls[i % calls.len()]);
    }
    for client in &clients {
        assert_eq!(harness.reply_to(*client).code, status::OK);
    }

    assert_eq!(conflicts.load(Ordering::SeqCst), 0);
    assert!(!vnode.is_locked());
    assert!(!vnode.has_pending());
    harness.finish();
}

#[test]
fn test_relock_aborts_the_worker() {
    let vnode = Arc::new(Tll::new());
    let table = {
        let vnode = vnode.clone();
        DispatchTable::new().register(call::VFS_WRITE, move |w: &mut Worker| {
            let _first = vnode.lock(w, LockLevel::Read);
            let _second = vnode.lock(w, LockLevel::Read);
            status::OK
        })
    };
    let mut harness = Harness::with_workers(1, table);
    harness.close();

    // Submitted directly: the message loop is already closed
    harness
        .vfsd
        .submit(Message::request(Endpoint(100), call::VFS_WRITE, Vec::new()));
    assert!(matches!(
        harness.vfsd.shutdown(),
        Err(VfsdError::WorkerPanicked(_))
    ));
    assert!(harness.quiet(Endpoint(100)));
}
