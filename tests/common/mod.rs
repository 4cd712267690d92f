use std::sync::Arc;
use std::time::Duration;

use meshsync::AgentEnd;
use meshsync::AgentStream;
use meshsync::Controller;
use meshsync::ControllerBuilder;
use meshsync::ControllerConfig;
use meshsync::KeepaliveProbe;
use meshsync::KeepaliveRequest;
use meshsync::Kind;
use meshsync::MemoryStore;
use meshsync::Message;
use meshsync::Network;
use meshsync::Node;
use meshsync::NodePhase;
use meshsync::NodeStatus;
use meshsync::Policy;
use meshsync::Resource;
use meshsync::Result;
use meshsync::StoreClient;
use meshsync::WatchRequest;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const NS: &str = "default";

/// Upper bound for anything the controller does asynchronously
pub const SETTLE: Duration = Duration::from_secs(3);

pub type WatchEnd = AgentEnd<WatchRequest, Message>;
pub type KeepaliveEnd = AgentEnd<KeepaliveRequest, KeepaliveProbe>;

pub fn node(
    app_id: &str,
    address: &str,
    networks: &[&str],
) -> Node {
    let mut node = Node::new(NS, app_id, address, format!("pk-{app_id}"));
    node.spec.private_key = format!("sk-{app_id}");
    node.spec.networks = networks.iter().map(|n| n.to_string()).collect();
    node.status.phase = NodePhase::Ready;
    node.status.status = NodeStatus::Active;
    node
}

pub fn network(
    name: &str,
    members: &[&str],
) -> Network {
    let mut n = Network::new(NS, name, "10.0.0.0/24");
    for m in members {
        n.add_member(m);
    }
    n
}

/// Short timers so disconnect and keepalive paths finish within a test
pub fn fast_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.store.conflict_backoff_ms = 1;
    config.queue.workers = 2;
    config.stream.disconnect_grace_ms = 200;
    config.stream.keepalive_interval_ms = 50;
    config.stream.keepalive_timeout_ms = 100;
    config
}

pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub controller: Arc<Controller>,
    graceful_tx: watch::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl TestContext {
    pub async fn start(resources: Vec<Resource>) -> Self {
        let store = Arc::new(MemoryStore::new());
        for r in resources {
            store.create(r).await.expect("seed resource");
        }

        let (graceful_tx, graceful_rx) = watch::channel(());
        let controller =
            Arc::new(ControllerBuilder::new(fast_config(), store.clone(), graceful_rx).build());
        let c = controller.clone();
        let handle = tokio::spawn(async move { c.run().await });

        // Let the watcher subscribe before the test mutates the store
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            store,
            controller,
            graceful_tx,
            handle,
        }
    }

    /// Opens a Watch stream for `app_id` and waits for its Init snapshot
    pub async fn connect(
        &self,
        app_id: &str,
    ) -> (WatchEnd, Message) {
        let (stream, end) = AgentStream::channel(16);
        end.requests
            .send(Ok(WatchRequest {
                app_id: app_id.to_string(),
            }))
            .await
            .expect("handler side open");

        let handler = self.controller.watch_handler();
        tokio::spawn(async move { handler.handle(stream).await });

        let mut end = end;
        let init = next_message(&mut end).await;
        (end, init)
    }

    pub async fn keepalive(
        &self,
        app_id: &str,
    ) -> KeepaliveEnd {
        let (stream, end) = AgentStream::channel(16);
        end.requests
            .send(Ok(KeepaliveRequest {
                app_id: app_id.to_string(),
                pub_key: format!("pk-{app_id}"),
            }))
            .await
            .expect("handler side open");

        let handler = self.controller.keepalive_handler();
        tokio::spawn(async move { handler.handle(stream).await });
        end
    }

    pub async fn node(
        &self,
        app_id: &str,
    ) -> Node {
        self.store
            .get(Kind::Node, NS, app_id)
            .await
            .expect("node exists")
            .into_node()
            .expect("a node")
    }

    /// Polls the store until the node reaches `status`
    pub async fn wait_for_status(
        &self,
        app_id: &str,
        status: NodeStatus,
    ) {
        timeout(SETTLE, async {
            while self.node(app_id).await.status.status != status {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{app_id} never became {status:?}"));
    }

    pub async fn create_policy(
        &self,
        policy: Policy,
    ) {
        self.store.create(policy.into()).await.expect("create policy");
    }

    pub async fn shutdown(self) {
        self.graceful_tx.send(()).expect("controller listening");
        timeout(SETTLE, self.handle)
            .await
            .expect("controller stops in time")
            .expect("controller task")
            .expect("controller result");
    }
}

pub async fn next_message(end: &mut WatchEnd) -> Message {
    timeout(SETTLE, end.responses.recv())
        .await
        .expect("message in time")
        .expect("stream open")
        .expect("message, not a status")
}

/// Reads messages until one matches `pred`
pub async fn wait_for_message<P>(
    end: &mut WatchEnd,
    mut pred: P,
) -> Message
where
    P: FnMut(&Message) -> bool,
{
    loop {
        let msg = next_message(end).await;
        if pred(&msg) {
            return msg;
        }
    }
}

/// True when nothing arrives within `window`
pub async fn stays_quiet(
    end: &mut WatchEnd,
    window: Duration,
) -> bool {
    timeout(window, end.responses.recv()).await.is_err()
}
