//! Callbacks from a file-system server into the call waiting on it.

mod common;

use std::sync::{Arc, Mutex};

use common::Harness;
use zos_vfsd::{
    call, endpoint, status, DispatchTable, Endpoint, Message, VfsdConfig, Worker, WorkerId,
};

const FS: Endpoint = endpoint::ROOT_FS;
const FS2: Endpoint = Endpoint(8);

/// Server that calls back once per request, then answers `payload`.
fn calls_back_then_answers(server: Endpoint, payload: &'static [u8]) -> impl Fn(&Message) -> Option<Message> {
    move |msg: &Message| {
        let tag = msg.tag?;
        if msg.is_request() {
            Some(Message::request(server, call::VFS_GETSYSINFO, Vec::new()).with_tag(tag))
        } else {
            Some(Message {
                source: server,
                code: status::OK,
                tag: Some(tag),
                payload: payload.to_vec(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Seen {
    worker: WorkerId,
    caller: Endpoint,
    depth: usize,
}

#[test]
fn test_callback_serviced_by_waiting_worker() {
    let seen: Arc<Mutex<Vec<Seen>>> = Arc::default();
    let outer: Arc<Mutex<Vec<Seen>>> = Arc::default();
    let table = {
        let (seen, outer) = (seen.clone(), outer.clone());
        DispatchTable::new()
            .register(call::VFS_OPEN, move |w: &mut Worker| {
                w.call_mut().path.push_str("/mnt/data");
                let request = Message::request(endpoint::VFS, call::REQ_LOOKUP, Vec::new());
                let code = match w.send_and_wait(FS, request) {
                    Ok(reply) => {
                        w.call_mut().reply = reply.payload;
                        reply.code
                    }
                    Err(e) => e.status(),
                };
                assert_eq!(w.call().path, "/mnt/data");
                outer.lock().unwrap().push(Seen {
                    worker: w.id(),
                    caller: w.call().caller,
                    depth: w.nesting_depth(),
                });
                code
            })
            .register(call::VFS_GETSYSINFO, move |w: &mut Worker| {
                seen.lock().unwrap().push(Seen {
                    worker: w.id(),
                    caller: w.call().caller,
                    depth: w.nesting_depth(),
                });
                w.call_mut().reply.extend_from_slice(b"sysinfo");
                status::OK
            })
    };
    let harness = Harness::with_workers(1, table);
    harness.vfsd.register_server(FS);
    harness
        .transport
        .respond_with(FS, calls_back_then_answers(FS, b"done"));

    harness.call(100, call::VFS_OPEN);
    let reply = harness.reply_to(100);
    assert_eq!(reply.code, status::OK);
    assert_eq!(reply.payload, b"done".to_vec());

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Seen {
            worker: WorkerId(0),
            caller: FS,
            depth: 1
        }]
    );
    assert_eq!(
        *outer.lock().unwrap(),
        vec![Seen {
            worker: WorkerId(0),
            caller: Endpoint(100),
            depth: 0
        }]
    );

    // The server got the callback's answer, tagged like its request
    let to_fs = harness.transport.sent_to(FS);
    assert_eq!(to_fs.len(), 2);
    assert_eq!(to_fs[1].code, status::OK);
    assert_eq!(to_fs[1].tag, to_fs[0].tag);
    assert_eq!(to_fs[1].payload, b"sysinfo".to_vec());
    harness.finish();
}

#[test]
fn test_callback_from_unregistered_server_is_a_client_request() {
    let table = DispatchTable::new()
        .register(call::VFS_OPEN, |w: &mut Worker| {
            let request = Message::request(endpoint::VFS, call::REQ_LOOKUP, Vec::new());
            match w.send_and_wait(FS, request) {
                Ok(reply) => reply.code,
                Err(e) => e.status(),
            }
        })
        .register(call::VFS_GETSYSINFO, |w: &mut Worker| {
            // Runs as its own job, not nested
            assert_eq!(w.nesting_depth(), 0);
            status::OK
        });
    let harness = Harness::with_workers(2, table);
    harness
        .transport
        .respond_with(FS, calls_back_then_answers(FS, b"done"));

    harness.call(100, call::VFS_OPEN);
    // The callback is serviced by the second pool worker; its reply prompts
    // the server's final answer to the first
    assert_eq!(harness.reply_to(100).code, status::OK);
    harness.finish();
}

#[test]
fn test_nesting_beyond_limit_answers_eio() {
    let fs2_saw: Arc<Mutex<Vec<i32>>> = Arc::default();
    let table = DispatchTable::new()
        .register(call::VFS_OPEN, |w: &mut Worker| {
            let request = Message::request(endpoint::VFS, call::REQ_LOOKUP, Vec::new());
            match w.send_and_wait(FS, request) {
                Ok(reply) => {
                    w.call_mut().reply = reply.payload;
                    reply.code
                }
                Err(e) => e.status(),
            }
        })
        .register(call::VFS_GETSYSINFO, |w: &mut Worker| {
            if w.call().caller != FS {
                return status::OK;
            }
            // Inside the first callback, call a second server
            let request = Message::request(endpoint::VFS, call::REQ_READ, Vec::new());
            match w.send_and_wait(FS2, request) {
                Ok(reply) => reply.code,
                Err(e) => e.status(),
            }
        });
    let config = VfsdConfig {
        workers: 1,
        max_nesting: 1,
        ..VfsdConfig::default()
    };
    let harness = Harness::start(config, table);
    harness.vfsd.register_server(FS);
    harness.vfsd.register_server(FS2);
    harness
        .transport
        .respond_with(FS, calls_back_then_answers(FS, b"outer"));
    {
        let fs2_saw = fs2_saw.clone();
        let inner = calls_back_then_answers(FS2, b"inner");
        harness.transport.respond_with(FS2, move |msg| {
            if msg.is_reply() {
                fs2_saw.lock().unwrap().push(msg.code);
            }
            inner(msg)
        });
    }

    harness.call(100, call::VFS_OPEN);
    let reply = harness.reply_to(100);
    assert_eq!(reply.code, status::OK);
    assert_eq!(reply.payload, b"outer".to_vec());

    // The second-level callback was refused rather than nested
    assert_eq!(*fs2_saw.lock().unwrap(), vec![status::EIO]);
    harness.finish();
}
