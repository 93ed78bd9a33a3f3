use stcp::context::State;
use stcp::test_support::{channel_pair, ScriptedApplication};
use stcp::Context;

#[test]
fn handshake_reaches_established_both_sides() {
    let (client_dg, server_dg) = channel_pair();

    let client = std::thread::spawn(move || {
        Context::open(client_dg, ScriptedApplication::new(Vec::new(), false), true).unwrap()
    });
    let server =
        Context::open(server_dg, ScriptedApplication::new(Vec::new(), false), false).unwrap();
    let client = client.join().unwrap();

    assert_eq!(client.state(), State::Established);
    assert_eq!(server.state(), State::Established);
}

#[test]
fn byte_stream_is_delivered_end_to_end() {
    let (client_dg, server_dg) = channel_pair();
    let message = b"the quick brown fox jumps over the lazy dog".to_vec();
    let message_for_client = message.clone();

    let client = std::thread::spawn(move || {
        let mut ctx = Context::open(
            client_dg,
            ScriptedApplication::new(message_for_client, true),
            true,
        )
        .unwrap();
        ctx.run_control_loop().unwrap();
        ctx
    });

    let mut server =
        Context::open(server_dg, ScriptedApplication::new(Vec::new(), false), false).unwrap();
    server.run_control_loop().unwrap();

    let client = client.join().unwrap();
    assert_eq!(client.state(), State::Closed);
    assert_eq!(server.state(), State::Closed);
}

#[test]
fn passive_close_transitions_through_close_wait() {
    let (client_dg, server_dg) = channel_pair();

    let client = std::thread::spawn(move || {
        let mut ctx = Context::open(
            client_dg,
            ScriptedApplication::new(b"bye".to_vec(), true),
            true,
        )
        .unwrap();
        ctx.run_control_loop().unwrap();
        ctx
    });

    let mut server =
        Context::open(server_dg, ScriptedApplication::new(Vec::new(), false), false).unwrap();
    server.run_control_loop().unwrap();

    let client = client.join().unwrap();
    assert!(client.is_done());
    assert!(server.is_done());
    assert_eq!(server.state(), State::Closed);
}
