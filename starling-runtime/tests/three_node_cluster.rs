//! End-to-end test: three servers over the channel transport elect a
//! leader, replicate a signed client command, and answer the client.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use starling_core::{ClientId, NodeId};
use starling_crypto::{ClientSigner, KeyRing, NodeSigner};
use starling_raft::{RaftClient, RaftRole, Rpc, StateMachine};
use starling_runtime::codec;
use starling_runtime::{
    ChannelTransport, RaftServer, ServerConfig, ServerHandle, TimingConfig,
};
use tokio::sync::mpsc;

/// Appends every applied command to a shared list.
struct RecordingMachine {
    applied: Arc<std::sync::Mutex<Vec<Bytes>>>,
}

impl StateMachine for RecordingMachine {
    fn apply(&mut self, command: &Bytes) -> Bytes {
        self.applied
            .lock()
            .expect("applied list poisoned")
            .push(command.clone());
        let mut result = b"applied:".to_vec();
        result.extend_from_slice(command);
        Bytes::from(result)
    }
}

fn node_signer(id: u64) -> NodeSigner {
    #[allow(clippy::cast_possible_truncation)]
    let seed = [id as u8; 32];
    NodeSigner::from_seed(NodeId::new(id), &seed)
}

fn client_signer() -> ClientSigner {
    ClientSigner::from_seed(ClientId::new(9), &[9; 32])
}

fn cluster_keys() -> KeyRing {
    let mut ring = KeyRing::new();
    for id in [1, 2, 3] {
        ring.add_node_key(NodeId::new(id), node_signer(id).public_key());
    }
    ring.add_client_key(ClientId::new(9), client_signer().public_key());
    ring
}

async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_nodes_elect_replicate_and_answer() {
    let cluster: Vec<NodeId> = vec![NodeId::new(1), NodeId::new(2), NodeId::new(3)];
    let transport = Arc::new(ChannelTransport::new());

    let applied: Vec<Arc<std::sync::Mutex<Vec<Bytes>>>> =
        (0..3).map(|_| Arc::new(std::sync::Mutex::new(Vec::new()))).collect();

    let mut handles: Vec<ServerHandle> = Vec::new();
    let mut tasks = Vec::new();
    for (i, &node_id) in cluster.iter().enumerate() {
        let config = ServerConfig::new(node_id, cluster.clone())
            .with_quorum_size(2)
            .with_timing(TimingConfig::fast_for_testing());
        let machine = RecordingMachine {
            applied: Arc::clone(&applied[i]),
        };
        let (handle, server) = RaftServer::new(
            &config,
            node_signer(node_id.get()),
            cluster_keys(),
            machine,
            Arc::clone(&transport),
        );
        transport.register_node(node_id, handle.events());
        handles.push(handle);
        tasks.push(tokio::spawn(server.run()));
    }

    // The client's response inbox.
    let (client_tx, mut client_rx) = mpsc::channel(16);
    transport.register_client(ClientId::new(9), client_tx);

    // A leader emerges.
    wait_for("leader election", || {
        handles.iter().any(|h| h.status().role == RaftRole::Leader)
    })
    .await;
    let leader_index = handles
        .iter()
        .position(|h| h.status().role == RaftRole::Leader)
        .expect("leader exists");

    // The client signs a command and sends it to the leader.
    let mut client = RaftClient::new(client_signer(), cluster.clone());
    let command = client.create_command(Bytes::from_static(b"set x=1"));
    let frame = codec::encode_client_signed(&Rpc::Command(command)).expect("encode command");
    handles[leader_index]
        .inject(frame)
        .await
        .expect("inject command");

    // Every replica applies it.
    wait_for("all replicas to apply", || {
        applied
            .iter()
            .all(|log| !log.lock().expect("applied list poisoned").is_empty())
    })
    .await;
    for log in &applied {
        let entries = log.lock().expect("applied list poisoned");
        assert_eq!(entries.as_slice(), [Bytes::from_static(b"set x=1")]);
    }

    // The client hears back with a verified, signed response.
    let response_frame = tokio::time::timeout(Duration::from_secs(10), client_rx.recv())
        .await
        .expect("client response in time")
        .expect("client channel open");
    let frame = codec::decode_frame(response_frame).expect("decode response");
    match frame.rpc {
        Rpc::CommandResponse(response) => {
            assert_eq!(response.result, Bytes::from_static(b"applied:set x=1"));
            assert!(response.verify(&cluster_keys()));
            client.observe_response(&response);
            assert!(client.leader().is_some());
        }
        other => panic!("expected a command response, got {other:?}"),
    }

    for handle in &handles {
        let _ = handle.shutdown().await;
    }
    for task in tasks {
        task.await.expect("server task join");
    }
}
