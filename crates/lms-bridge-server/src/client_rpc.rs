//! Services the LMS page exposes to the embedded annotation client

use lms_bridge_client::{Client, RpcError};
use lms_bridge_core::FrameRef;
use serde::Serialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::watch;

use crate::registry::HandlerError;
use crate::server::Server;

pub const REQUEST_CONFIG: &str = "requestConfig";
pub const REQUEST_GROUPS: &str = "requestGroups";
pub const CHANGE_FOCUS_MODE_USER: &str = "changeFocusModeUser";

/// Student whose annotations the grader is looking at
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FocusedUser {
    pub username: String,
    pub display_name: String,
    pub groups: Vec<String>,
}

/// Wraps the RPC server on the LMS page.
///
/// The embedded client asks for its configuration and the groups to show;
/// groups may be fetched from the backend after the client has already
/// asked, so `requestGroups` waits until [`ClientRpc::set_groups`] is called.
pub struct ClientRpc {
    server: Server,
    client: Client,
    groups: Arc<watch::Sender<Option<Value>>>,
}

impl ClientRpc {
    pub fn new<I, S>(window: FrameRef, allowed_origins: I, client_config: Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let server = Server::new(window.clone(), allowed_origins);
        let (groups, _) = watch::channel(None);
        let groups = Arc::new(groups);

        server.register_fn(REQUEST_CONFIG, move |_params| {
            Ok::<_, Infallible>(client_config.clone())
        });

        let pending_groups = groups.clone();
        server.register(REQUEST_GROUPS, move |_params| {
            wait_for_groups(pending_groups.subscribe())
        });

        Self {
            server,
            client: Client::new(window),
            groups,
        }
    }

    /// Make `groups` available to current and future `requestGroups` calls.
    pub fn set_groups(&self, groups: Value) {
        self.groups.send_replace(Some(groups));
    }

    /// Ask the sidebar to show only `user`'s annotations, or everyone's when
    /// `None`.
    ///
    /// Waits until the sidebar has contacted the server at least once.
    pub async fn set_focused_user(&self, user: Option<&FocusedUser>) -> Result<(), RpcError> {
        let sidebar = self.server.sidebar_window().await;
        let params = match user {
            Some(user) => serde_json::to_value(user)?,
            None => json!({}),
        };

        self.client.notify(
            &sidebar.frame,
            &sidebar.origin,
            CHANGE_FOCUS_MODE_USER,
            vec![params],
        )
    }

    pub fn server(&self) -> &Server {
        &self.server
    }
}

async fn wait_for_groups(mut rx: watch::Receiver<Option<Value>>) -> Result<Value, HandlerError> {
    let groups = match rx.wait_for(Option::is_some).await {
        Ok(groups) => groups.clone(),
        Err(_) => None,
    };

    groups.ok_or_else(|| HandlerError::new("groups are no longer available"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lms_bridge_core::{Frame, InMemoryWindow, MessageEvent};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const LMS: &str = "https://lms.example.com";
    const SIDEBAR: &str = "https://hypothes.is";

    fn setup() -> (Arc<InMemoryWindow>, Arc<InMemoryWindow>, ClientRpc, Client) {
        let lms = InMemoryWindow::new(LMS);
        let sidebar = InMemoryWindow::new(SIDEBAR);
        let rpc = ClientRpc::new(
            lms.clone(),
            [SIDEBAR],
            json!({"services": [{"apiUrl": "https://hypothes.is/api/"}]}),
        );
        let client = Client::new(sidebar.clone()).with_timeout(Duration::from_millis(500));
        (lms, sidebar, rpc, client)
    }

    #[tokio::test]
    async fn test_request_config() {
        let (lms, _sidebar, _rpc, client) = setup();
        let frame: FrameRef = lms.clone();

        let config = client
            .call(&frame, LMS, REQUEST_CONFIG, vec![])
            .await
            .unwrap();
        assert_eq!(config["services"][0]["apiUrl"], "https://hypothes.is/api/");
    }

    #[tokio::test]
    async fn test_request_groups_waits_for_groups() {
        let (lms, _sidebar, rpc, client) = setup();
        let frame: FrameRef = lms.clone();

        let pending =
            tokio::spawn(async move { client.call(&frame, LMS, REQUEST_GROUPS, vec![]).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!pending.is_finished());

        rpc.set_groups(json!(["group1", "group2"]));
        let groups = pending.await.unwrap().unwrap();
        assert_eq!(groups, json!(["group1", "group2"]));
    }

    #[tokio::test]
    async fn test_focused_user_notification() {
        let (lms, sidebar, rpc, client) = setup();
        let (tx, mut received) = mpsc::unbounded_channel();
        sidebar.add_message_listener(Arc::new(move |event: &MessageEvent| {
            let _ = tx.send(event.data.clone());
        }));

        // The sidebar has to call in before the LMS can address it
        let frame: FrameRef = lms.clone();
        client
            .call(&frame, LMS, REQUEST_CONFIG, vec![])
            .await
            .unwrap();
        // Drain the reply to requestConfig
        received.recv().await.unwrap();

        let user = FocusedUser {
            username: "acct:student@lms.hypothes.is".to_string(),
            display_name: "Student".to_string(),
            groups: vec!["group1".to_string()],
        };
        rpc.set_focused_user(Some(&user)).await.unwrap();

        let notification = timeout(Duration::from_secs(1), received.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            notification,
            json!({
                "jsonrpc": "2.0",
                "method": "changeFocusModeUser",
                "params": [{
                    "username": "acct:student@lms.hypothes.is",
                    "displayName": "Student",
                    "groups": ["group1"]
                }]
            })
        );

        rpc.set_focused_user(None).await.unwrap();
        let cleared = received.recv().await.unwrap();
        assert_eq!(cleared["params"], json!([{}]));
    }
}
