use chrono::Utc;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use super::orders::{format_order_line, order_delete, order_transition, parse_order_id};
use super::AppContext;
use crate::api::ApiClient;
use crate::config::TransportKind;
use crate::notifications::{LogSink, Notification, NotificationSink, Severity, ToastQueue};
use crate::orders::{OrderAction, OrderId, Snapshot};
use crate::sync::{SyncObserver, Synchronizer};

const WATCH_HELP: &str =
    "Commands: start|complete|cancel|delete <order-id>, refresh, toasts, clear, quit";

/// Terminal rendering of the live order view. Toasts are printed as they
/// arrive and kept in a [`ToastQueue`]; the order table is reprinted only
/// when the collection actually changed.
pub struct ConsoleView<W: Write + Send> {
    out: Mutex<W>,
    toasts: ToastQueue,
    last_rendered: Mutex<Option<Snapshot>>,
}

impl<W: Write + Send> ConsoleView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            toasts: ToastQueue::default(),
            last_rendered: Mutex::new(None),
        }
    }

    pub fn toasts(&self) -> &ToastQueue {
        &self.toasts
    }

    fn write_lines(&self, lines: &[String]) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        for line in lines {
            if let Err(e) = writeln!(out, "{line}") {
                warn!(error = %e, "failed to write to console");
                return;
            }
        }
        let _ = out.flush();
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub fn render_toast(notification: &Notification) -> String {
    let marker = match notification.severity {
        Severity::Success => "OK",
        Severity::Info => "--",
        Severity::Error => "!!",
    };
    format!(
        "[{marker}] {}: {}",
        notification.title, notification.message
    )
}

impl<W: Write + Send> SyncObserver for ConsoleView<W> {
    fn on_snapshot(&self, snapshot: Snapshot) {
        {
            let Ok(mut last) = self.last_rendered.lock() else {
                return;
            };
            if last.as_ref() == Some(&snapshot) {
                return;
            }
            *last = Some(snapshot.clone());
        }
        let mut lines = vec![format!(
            "== {} order(s) at {} ==",
            snapshot.len(),
            Utc::now().format("%H:%M:%S")
        )];
        lines.extend(snapshot.orders().iter().map(format_order_line));
        self.write_lines(&lines);
    }

    fn on_notify(&self, notification: Notification) {
        self.write_lines(&[render_toast(&notification)]);
        LogSink.push(notification.clone());
        self.toasts.push(notification);
    }
}

// ---------------------------------------------------------------------------
// Interactive input
// ---------------------------------------------------------------------------

/// One line typed while watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchInput {
    Refresh,
    Transition { action: OrderAction, id: OrderId },
    Delete { id: OrderId },
    Toasts,
    Clear,
    Quit,
}

impl WatchInput {
    /// `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let input = match words.as_slice() {
            [] => return Ok(None),
            ["refresh" | "r"] => Self::Refresh,
            ["toasts"] => Self::Toasts,
            ["clear"] => Self::Clear,
            ["quit" | "q" | "exit"] => Self::Quit,
            ["delete", id] => Self::Delete {
                id: parse_order_id(id)?,
            },
            [name @ ("start" | "complete" | "cancel"), id] => Self::Transition {
                action: OrderAction::parse(name).ok_or_else(|| format!("Unknown action: {name}"))?,
                id: parse_order_id(id)?,
            },
            _ => return Err(format!("Unrecognised input: {}\n{WATCH_HELP}", line.trim())),
        };
        Ok(Some(input))
    }
}

/// Run one typed command against the live session and return the line to
/// print. Errors are inline messages, like the one-shot commands.
pub async fn handle_input<W: Write + Send>(
    api: &ApiClient,
    sync: &Synchronizer,
    view: &ConsoleView<W>,
    input: WatchInput,
) -> Result<String, String> {
    match input {
        WatchInput::Refresh => {
            if !sync.refresh() {
                return Err("Synchronizer is not running".to_string());
            }
            Ok("Refresh requested".to_string())
        }
        WatchInput::Transition { action, id } => {
            let updated = order_transition(api, &id, action).await?;
            sync.refresh();
            let status = updated
                .map(|o| o.status)
                .unwrap_or_else(|| action.target_status());
            Ok(format!("Order #{id} is now {status}"))
        }
        WatchInput::Delete { id } => {
            order_delete(api, &id, Some(sync)).await?;
            Ok(format!("Order #{id} deleted"))
        }
        WatchInput::Toasts => {
            let active = view.toasts().active(Utc::now());
            if active.is_empty() {
                return Ok("No active notifications.".to_string());
            }
            Ok(active
                .iter()
                .map(render_toast)
                .collect::<Vec<_>>()
                .join("\n"))
        }
        WatchInput::Clear => {
            let toasts = view.toasts();
            let dismissed = toasts
                .active(Utc::now())
                .iter()
                .filter(|t| toasts.dismiss(t.id))
                .count();
            Ok(format!("Dismissed {dismissed} notification(s)"))
        }
        WatchInput::Quit => Ok(String::new()),
    }
}

/// Run the synchronizer until Ctrl-C or `quit`, executing commands typed on
/// stdin against the live session.
pub async fn run_watch(ctx: &AppContext, transport: Option<TransportKind>) -> Result<(), String> {
    let api = ctx.authenticated_api()?;
    let mut config = ctx.config.clone();
    if let Some(kind) = transport {
        config.transport = kind;
    }

    let sync = Synchronizer::from_config(&config, api.clone());
    let view = Arc::new(ConsoleView::new(std::io::stdout()));
    sync.start(view.clone());
    println!(
        "Watching orders via {} (Ctrl-C or `quit` to stop)",
        config.transport.as_str()
    );
    println!("{WATCH_HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                break signal.map_err(|e| format!("Failed to listen for Ctrl-C: {e}"));
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match WatchInput::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(WatchInput::Quit)) => break Ok(()),
                    Ok(Some(input)) => match handle_input(&api, &sync, &view, input).await {
                        Ok(message) => println!("{message}"),
                        Err(e) => println!("Error: {e}"),
                    },
                    Err(e) => println!("{e}"),
                },
                Ok(None) => {
                    debug!("stdin closed, waiting for Ctrl-C");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read stdin");
                    stdin_open = false;
                }
            },
        }
    };
    sync.stop();
    outcome?;

    let status = sync.status();
    info!(
        orders = status.order_count,
        toasts = view.toasts().len(),
        "watch finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::serve_once;
    use crate::orders::parse_snapshot;
    use crate::sync::testing::{orders, ScriptedSource, Step};
    use crate::sync::SyncSettings;
    use serde_json::json;
    use std::time::Duration;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(base, Duration::from_secs(5))
            .unwrap()
            .with_credentials("1", None)
    }

    fn idle_sync() -> Synchronizer {
        Synchronizer::polling(ScriptedSource::new(Vec::new()), SyncSettings::default())
    }

    async fn wait_for_len(sync: &Synchronizer, len: usize) {
        for _ in 0..100 {
            if sync.current_snapshot().len() == len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("snapshot never reached {len} orders");
    }

    #[test]
    fn test_parse_watch_input() {
        assert_eq!(WatchInput::parse("   ").unwrap(), None);
        assert_eq!(WatchInput::parse("r").unwrap(), Some(WatchInput::Refresh));
        assert_eq!(
            WatchInput::parse(" delete #8 ").unwrap(),
            Some(WatchInput::Delete {
                id: OrderId::new("8")
            })
        );
        assert_eq!(
            WatchInput::parse("cancel 3").unwrap(),
            Some(WatchInput::Transition {
                action: OrderAction::Cancel,
                id: OrderId::new("3")
            })
        );
        assert_eq!(WatchInput::parse("quit").unwrap(), Some(WatchInput::Quit));
        assert!(WatchInput::parse("delete").is_err());
        assert!(WatchInput::parse("approve 3").is_err());
    }

    #[tokio::test]
    async fn test_delete_while_watching_drops_order_from_live_view() {
        let source = ScriptedSource::new(vec![Step::Reply(orders(&[(8, "PENDING"), (9, "PENDING")]))]);
        let sync = Synchronizer::polling(
            source,
            SyncSettings {
                poll_interval: Duration::from_secs(600),
                ..Default::default()
            },
        );
        let view = Arc::new(ConsoleView::new(Vec::new()));
        assert!(sync.start(view.clone()));
        wait_for_len(&sync, 2).await;

        let (base, _server) = serve_once("404 Not Found", "").await;
        let err = handle_input(
            &client(&base),
            &sync,
            &view,
            WatchInput::Delete {
                id: OrderId::new("8"),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err, "Resource not found");
        assert_eq!(sync.current_snapshot().len(), 2);

        let (base, server) = serve_once("200 OK", "").await;
        let message = handle_input(
            &client(&base),
            &sync,
            &view,
            WatchInput::Delete {
                id: OrderId::new("8"),
            },
        )
        .await
        .unwrap();
        assert_eq!(message, "Order #8 deleted");
        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("delete /api/orders/8 "));

        wait_for_len(&sync, 1).await;
        assert_eq!(sync.current_snapshot().orders()[0].id.as_str(), "9");
        assert!(view.toasts().is_empty());
        sync.stop();
    }

    #[tokio::test]
    async fn test_toasts_can_be_listed_and_cleared() {
        let api = client("http://127.0.0.1:9");
        let sync = idle_sync();
        let view = ConsoleView::new(Vec::new());
        view.on_notify(Notification::new(Severity::Info, "New Order Received", "one"));
        view.on_notify(Notification::new(Severity::Error, "Order #2", "Printer offline"));

        let listed = handle_input(&api, &sync, &view, WatchInput::Toasts).await.unwrap();
        assert_eq!(
            listed,
            "[--] New Order Received: one\n[!!] Order #2: Printer offline"
        );

        let cleared = handle_input(&api, &sync, &view, WatchInput::Clear).await.unwrap();
        assert_eq!(cleared, "Dismissed 2 notification(s)");
        let listed = handle_input(&api, &sync, &view, WatchInput::Toasts).await.unwrap();
        assert_eq!(listed, "No active notifications.");
    }

    #[tokio::test]
    async fn test_refresh_without_session_is_an_inline_error() {
        let view = ConsoleView::new(Vec::new());
        let err = handle_input(&client("http://127.0.0.1:9"), &idle_sync(), &view, WatchInput::Refresh)
            .await
            .unwrap_err();
        assert_eq!(err, "Synchronizer is not running");
    }

    #[test]
    fn test_render_toast() {
        let toast = Notification::new(Severity::Error, "Order #4", "Payment failed");
        assert_eq!(render_toast(&toast), "[!!] Order #4: Payment failed");
    }

    #[test]
    fn test_console_view_prints_changes_only() {
        let view = ConsoleView::new(Vec::new());
        let snapshot = parse_snapshot(&json!([
            { "id": 1, "status": "PENDING", "totalAmount": 3, "customer": { "name": "Kai" } }
        ]))
        .unwrap();

        view.on_snapshot(snapshot.clone());
        view.on_snapshot(snapshot);
        view.on_notify(Notification::new(Severity::Info, "New Order Received", "hi"));
        assert_eq!(view.toasts().len(), 1);

        let text = String::from_utf8(view.into_inner()).unwrap();
        assert_eq!(text.matches("order(s) at").count(), 1);
        assert!(text.contains("#1 "));
        assert!(text.contains("[--] New Order Received: hi"));
    }
}
