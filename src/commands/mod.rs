//! Command-line entry points.
//!
//! Each handler returns `Result<_, String>`: the error is the inline message
//! shown next to the command that caused it (backend `{message}` for non-2xx
//! answers). Background failures never come through here.

pub mod orders;
pub mod session;
pub mod watch;

use serde_json::Value;

use crate::api::ApiClient;
use crate::auth;
use crate::config::{AppConfig, TransportKind};
use crate::diagnostics;
use crate::orders::{OrderAction, OrderId};
use crate::storage::SessionStore;

pub const USAGE: &str = "\
Usage: restaurant-dashboard <command>

Commands:
  login <username> <password>   Sign in and store the session
  logout                        Clear the stored session
  whoami                        Show the stored admin identity
  orders [--json]               List orders for the signed-in admin
  start <order-id>              PENDING -> APPROVED
  complete <order-id>           APPROVED -> COMPLETED
  cancel <order-id>             Cancel an order that is not finished
  delete <order-id>             Delete an order
  watch [--poll|--push]         Follow orders live until Ctrl-C or `quit`;
                                accepts start/complete/cancel/delete <id>,
                                refresh, toasts and clear on stdin
  about                         Version and effective configuration
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { username: String, password: String },
    Logout,
    Whoami,
    Orders { json: bool },
    Transition { action: OrderAction, id: OrderId },
    Delete { id: OrderId },
    Watch { transport: Option<TransportKind> },
    About,
    Help,
}

impl Command {
    /// Parse arguments after the program name.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self, String> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        let Some((&name, rest)) = args.split_first() else {
            return Ok(Self::Help);
        };

        let command = match (name, rest) {
            ("login", [username, password]) => Self::Login {
                username: username.to_string(),
                password: password.to_string(),
            },
            ("login", _) => return Err("Usage: login <username> <password>".to_string()),
            ("logout", []) => Self::Logout,
            ("whoami", []) => Self::Whoami,
            ("orders", []) => Self::Orders { json: false },
            ("orders", ["--json"]) => Self::Orders { json: true },
            ("start" | "complete" | "cancel", [id]) => Self::Transition {
                action: OrderAction::parse(name)
                    .ok_or_else(|| format!("Unknown action: {name}"))?,
                id: orders::parse_order_id(id)?,
            },
            ("delete", [id]) => Self::Delete {
                id: orders::parse_order_id(id)?,
            },
            ("watch", []) => Self::Watch { transport: None },
            ("watch", ["--poll"]) => Self::Watch {
                transport: Some(TransportKind::Polling),
            },
            ("watch", ["--push"]) => Self::Watch {
                transport: Some(TransportKind::Push),
            },
            ("about" | "--version" | "-V", []) => Self::About,
            ("help" | "--help" | "-h", _) => Self::Help,
            _ => return Err(format!("Unrecognised command: {}\n\n{USAGE}", args.join(" "))),
        };
        Ok(command)
    }
}

/// Configuration plus the session store, shared by every command.
pub struct AppContext {
    pub config: AppConfig,
    pub store: SessionStore,
}

impl AppContext {
    pub fn new(config: AppConfig) -> Self {
        let store = SessionStore::from_config(&config);
        Self { config, store }
    }

    pub fn api(&self) -> Result<ApiClient, String> {
        ApiClient::new(&self.config.api_base_url, self.config.request_timeout)
            .map_err(|e| e.to_string())
    }

    /// Client for the stored session; fails with the "not logged in" message.
    pub fn authenticated_api(&self) -> Result<ApiClient, String> {
        let session = auth::require_session(&self.store).map_err(|e| e.to_string())?;
        Ok(auth::authenticated_client(self.api()?, &session))
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}

pub async fn dispatch(ctx: &AppContext, command: Command) -> Result<(), String> {
    match command {
        Command::Login { username, password } => {
            let result = session::session_login(&ctx.api()?, &ctx.store, &username, &password).await?;
            print_json(&result);
        }
        Command::Logout => print_json(&session::session_logout(&ctx.store)?),
        Command::Whoami => print_json(&session::session_whoami(&ctx.store)?),
        Command::Orders { json } => {
            let snapshot = orders::order_list(&ctx.authenticated_api()?).await?;
            if json {
                print_json(&orders::snapshot_json(&snapshot));
            } else if snapshot.is_empty() {
                println!("No orders.");
            } else {
                for order in snapshot.orders() {
                    println!("{}", orders::format_order_line(order));
                }
            }
        }
        Command::Transition { action, id } => {
            let updated = orders::order_transition(&ctx.authenticated_api()?, &id, action).await?;
            let status = updated
                .map(|o| o.status)
                .unwrap_or_else(|| action.target_status());
            println!("Order #{id} is now {status}");
        }
        Command::Delete { id } => {
            orders::order_delete(&ctx.authenticated_api()?, &id, None).await?;
            println!("Order #{id} deleted");
        }
        Command::Watch { transport } => watch::run_watch(ctx, transport).await?,
        Command::About => {
            let mut about = diagnostics::get_about_info();
            about["config"] = diagnostics::config_summary(&ctx.config);
            print_json(&about);
        }
        Command::Help => print!("{USAGE}"),
    }
    Ok(())
}
