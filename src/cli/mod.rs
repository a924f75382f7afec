//! Command line front end.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use soapstock::connection::AppContext;
use soapstock::connection::config::{AppConfig, BackendConfig};
use soapstock::core::{CollectionPath, DocumentId, Fields, Item, Value};
use soapstock::live::LiveCollections;
use soapstock::web::{self, WebState};
use std::future::Future;
use std::net::SocketAddr;
use tracing::info;

#[derive(Parser)]
#[command(name = "soapstock")]
#[command(about = "Live inventory of soaps and stores")]
pub struct Cli {
    /// Overrides SOAPSTOCK_APP_ID
    #[arg(long, global = true)]
    app_id: Option<String>,

    /// Overrides SOAPSTOCK_BACKEND_CONFIG (JSON)
    #[arg(long, global = true)]
    backend_config: Option<String>,

    /// Overrides SOAPSTOCK_AUTH_TOKEN
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve collections over HTTP
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
    },
    /// Print the current items of a collection
    List {
        collection: String,
        /// Field to sort by
        #[arg(long, default_value = "nombre")]
        sort: String,
    },
    /// Follow a collection, printing every snapshot
    Watch { collection: String },
    Get { collection: String, id: String },
    Create {
        collection: String,
        /// Field as key=value, repeatable
        #[arg(long = "field", short = 'f', value_parser = parse_field)]
        fields: Vec<(String, Value)>,
    },
    Update {
        collection: String,
        id: String,
        #[arg(long = "field", short = 'f', value_parser = parse_field)]
        fields: Vec<(String, Value)>,
        /// Replace the whole document instead of merging
        #[arg(long)]
        replace: bool,
    },
    Delete { collection: String, id: String },
}

impl Cli {
    fn config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::from_env();
        if let Some(app_id) = &self.app_id {
            config.app_id = app_id.clone();
        }
        if let Some(raw) = &self.backend_config {
            let backend = BackendConfig::parse(raw).context("invalid --backend-config")?;
            config = config.backend(backend);
        }
        if let Some(token) = &self.token {
            config = config.auth_token(token);
        }
        Ok(config)
    }

    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let context = AppContext::from_config(self.config()?)
            .context("failed to build application context")?;
        let session = context.ready().await.context("authentication failed")?;
        info!(user_id = %session.identity(), "session ready");

        let outcome = match self.command {
            Command::Serve { addr } => {
                let state = WebState::new(session.live().clone(), session.paths().clone());
                web::serve(state, addr, shutdown)
                    .await
                    .with_context(|| format!("server on {addr} failed"))
            }
            Command::List { collection, sort } => {
                let path = session.paths().collection(&collection)?;
                let snapshot = session.live().fetch(&path).await?.sorted_by(&sort);
                print_items(&snapshot.items)
            }
            Command::Watch { collection } => {
                let path = session.paths().collection(&collection)?;
                watch(session.live(), &path, shutdown).await
            }
            Command::Get { collection, id } => {
                let path = session.paths().collection(&collection)?;
                let item = session
                    .live()
                    .get_by_id(&path, &DocumentId::new(id.as_str()))
                    .await?
                    .ok_or_else(|| anyhow!("document '{}' not found in '{}'", id, path))?;
                print_items(std::slice::from_ref(&item))
            }
            Command::Create { collection, fields } => {
                let path = session.paths().collection(&collection)?;
                let id = session.live().create(&path, to_fields(fields)?).await?;
                println!("{}", id);
                Ok(())
            }
            Command::Update {
                collection,
                id,
                fields,
                replace,
            } => {
                let path = session.paths().collection(&collection)?;
                let id = DocumentId::new(id);
                let fields = to_fields(fields)?;
                if replace {
                    session.live().replace(&path, &id, fields).await?;
                } else {
                    session.live().update(&path, &id, fields).await?;
                }
                Ok(())
            }
            Command::Delete { collection, id } => {
                let path = session.paths().collection(&collection)?;
                session.live().delete(&path, &DocumentId::new(id)).await?;
                Ok(())
            }
        };

        context.shutdown().await.context("sign-out failed")?;
        outcome
    }
}

async fn watch<F>(live: &LiveCollections, path: &CollectionPath, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let mut subscription = live.subscribe(path);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                subscription.cancel();
                return Ok(());
            }
            event = subscription.next_snapshot() => match event {
                Some(Ok(snapshot)) => {
                    println!(
                        "# {} #{} ({} items)",
                        snapshot.path,
                        snapshot.sequence,
                        snapshot.len()
                    );
                    print_items(&snapshot.sorted_by("nombre").items)?;
                }
                Some(Err(err)) => {
                    return Err(err).with_context(|| format!("watch on '{path}' ended"));
                }
                None => return Ok(()),
            },
        }
    }
}

fn print_items(items: &[Item]) -> Result<()> {
    for item in items {
        println!("{}", serde_json::to_string(&item.to_json())?);
    }
    Ok(())
}

fn to_fields(pairs: Vec<(String, Value)>) -> Result<Fields> {
    if pairs.is_empty() {
        bail!("at least one --field key=value is required");
    }
    Ok(pairs.into_iter().collect())
}

fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing field name in '{}'", raw));
    }
    Ok((key.to_string(), Value::parse_literal(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field() {
        assert_eq!(
            parse_field("precio=12.5").unwrap(),
            ("precio".to_string(), Value::Float(12.5))
        );
        assert_eq!(
            parse_field("nombre=Lavanda").unwrap(),
            ("nombre".to_string(), Value::from("Lavanda"))
        );
        assert!(parse_field("nombre").is_err());
        assert!(parse_field("=x").is_err());
    }

    #[test]
    fn test_cli_parses_repeated_fields() {
        let cli = Cli::try_parse_from([
            "soapstock", "create", "jabones", "-f", "nombre=Avena", "--field", "stock=3",
        ])
        .unwrap();
        match cli.command {
            Command::Create { collection, fields } => {
                assert_eq!(collection, "jabones");
                assert_eq!(fields[1], ("stock".to_string(), Value::Integer(3)));
            }
            _ => panic!("expected create"),
        }
    }
}
