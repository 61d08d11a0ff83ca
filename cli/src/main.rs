//! Handoff CLI client - drive the review lifecycle from a terminal

mod client;
mod messages;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use client::HandoffClient;
use messages::{describe_event, ServerMessage};

#[derive(Parser)]
#[command(name = "handoff")]
#[command(about = "CLI client for the Handoff delivery and review server")]
#[command(version)]
struct Cli {
    /// Server base URL
    #[arg(short, long, env = "HANDOFF_SERVER", default_value = "http://localhost:3000")]
    server: String,

    /// Acting user id, sent as x-actor-id
    #[arg(short, long, env = "HANDOFF_ACTOR")]
    actor: Option<Uuid>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a work item
    Create {
        #[arg(short, long)]
        title: String,

        /// video or design
        #[arg(short, long, default_value = "design")]
        kind: String,

        /// Producer responsible for delivering
        #[arg(long)]
        assignee: Option<Uuid>,

        /// Absolute deadline (RFC 3339)
        #[arg(long)]
        deadline: Option<String>,

        /// Time allowed after start, in minutes
        #[arg(long)]
        allowed_minutes: Option<i64>,

        /// client_review or direct
        #[arg(long, default_value = "client_review")]
        workflow: String,

        /// Manifest entry as `kind` or `kind:Label`; repeat for each sub-item
        #[arg(long = "sub-item")]
        sub_items: Vec<String>,
    },

    /// List work items
    List {
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one work item
    Show { id: Uuid },

    /// Start work on an item (assignee only)
    Start { id: Uuid },

    /// Send an item to internal review
    Submit { id: Uuid },

    /// Record the internal review verdict
    Review {
        id: Uuid,

        /// Reject instead of approving
        #[arg(long)]
        reject: bool,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Acknowledge a revision request and resume work
    Acknowledge { id: Uuid },

    /// Mark an item completed
    Complete { id: Uuid },

    /// Cancel an item
    Cancel { id: Uuid },

    /// Submit a delivery
    Deliver {
        id: Uuid,

        /// Sub-item label; omit for a whole-item delivery
        #[arg(short, long)]
        label: Option<String>,

        /// Uploaded file reference
        #[arg(long, conflicts_with = "link", required_unless_present = "link")]
        file: Option<String>,

        /// External link such as a video URL
        #[arg(long)]
        link: Option<String>,

        /// Idempotency key for safe retries
        #[arg(long)]
        key: Option<String>,
    },

    /// Show the current batch per sub-item, or one label's history
    Batches {
        id: Uuid,

        #[arg(long)]
        history: bool,

        #[arg(short, long)]
        label: Option<String>,
    },

    /// Approve or request revision on a sub-item's current batch
    Decide {
        id: Uuid,

        /// Sub-item label; omit for a whole-item delivery
        #[arg(short, long)]
        label: Option<String>,

        #[arg(long, conflicts_with = "revise", required_unless_present = "revise")]
        approve: bool,

        #[arg(long)]
        revise: bool,

        #[arg(long)]
        notes: Option<String>,

        /// Image attachment reference; repeatable
        #[arg(long = "image")]
        images: Vec<String>,

        /// Audio attachment as `reference:seconds`; repeatable
        #[arg(long = "audio")]
        audio: Vec<String>,

        /// Decide as a guest through this review link token
        #[arg(long)]
        token: Option<String>,
    },

    /// Issue a review link for a work item or one delivery
    Link {
        id: Uuid,

        /// Scope the link to this delivery instead of the whole item
        #[arg(long)]
        delivery: Option<Uuid>,

        /// Lifetime in seconds; the server default applies when absent
        #[arg(long)]
        ttl_secs: Option<i64>,
    },

    /// Revoke a review link
    Revoke { link_id: Uuid },

    /// Open a review link the way a guest would
    Resolve { token: String },

    /// Check whether an item is late
    Late {
        id: Uuid,

        /// Instant to evaluate at (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<String>,
    },

    /// Follow the live event feed
    Watch {
        /// Only show events for this work item
        #[arg(long)]
        work_item: Option<Uuid>,

        /// Only show events the assignee should be told about
        #[arg(long)]
        assignee_only: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "handoff_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let client = HandoffClient::new(&cli.server, cli.actor)?;

    match cli.command {
        Commands::Create {
            title,
            kind,
            assignee,
            deadline,
            allowed_minutes,
            workflow,
            sub_items,
        } => {
            let manifest = build_manifest(&sub_items)?;
            let body = json!({
                "title": title,
                "kind": kind,
                "assigned_to": assignee,
                "deadline": deadline,
                "allowed_duration_minutes": allowed_minutes,
                "workflow": workflow,
                "manifest": manifest,
            });
            let item = client.create_work_item(&body).await?;
            print_item(&item);
            Ok(())
        }
        Commands::List { status } => run_list(&client, status.as_deref()).await,
        Commands::Show { id } => {
            print_item(&client.get_work_item(id).await?);
            Ok(())
        }
        Commands::Start { id } => run_transition(&client, id, "start", json!({})).await,
        Commands::Submit { id } => run_transition(&client, id, "submit", json!({})).await,
        Commands::Review { id, reject, notes } => {
            let verdict = if reject { "revision_requested" } else { "approved" };
            let body = json!({"verdict": verdict, "notes": notes});
            run_transition(&client, id, "internal-review", body).await
        }
        Commands::Acknowledge { id } => {
            run_transition(&client, id, "acknowledge", json!({})).await
        }
        Commands::Complete { id } => run_transition(&client, id, "complete", json!({})).await,
        Commands::Cancel { id } => run_transition(&client, id, "cancel", json!({})).await,
        Commands::Deliver {
            id,
            label,
            file,
            link,
            key,
        } => {
            let (kind, payload) = match (file, link) {
                (Some(file), _) => ("file", file),
                (None, Some(link)) => ("external_link", link),
                (None, None) => bail!("either --file or --link is required"),
            };
            let body = json!({
                "label": label,
                "kind": kind,
                "payload_ref": payload,
                "idempotency_key": key,
            });
            let delivery = client.submit_delivery(id, &body).await?;
            println!(
                "Delivery {} v{} ({})",
                str_field(&delivery, "id"),
                delivery["version"],
                delivery["label"].as_str().unwrap_or("whole item")
            );
            Ok(())
        }
        Commands::Batches { id, history, label } => {
            run_batches(&client, id, history, label.as_deref()).await
        }
        Commands::Decide {
            id,
            label,
            approve,
            revise: _,
            notes,
            images,
            audio,
            token,
        } => {
            let decision = if approve { "approved" } else { "revision_requested" };
            let attachments = build_attachments(&images, &audio)?;
            run_decide(
                &client,
                id,
                label.as_deref(),
                decision,
                notes,
                attachments,
                token.as_deref(),
            )
            .await
        }
        Commands::Link {
            id,
            delivery,
            ttl_secs,
        } => {
            let target = match delivery {
                Some(delivery) => json!({"type": "delivery", "id": delivery}),
                None => json!({"type": "work_item", "id": id}),
            };
            let link = client
                .issue_link(&json!({"target": target, "ttl_secs": ttl_secs}))
                .await?;
            println!("Link {}", str_field(&link, "id"));
            println!("  token:   {}", str_field(&link, "token"));
            println!("  expires: {}", str_field(&link, "expires_at"));
            Ok(())
        }
        Commands::Revoke { link_id } => {
            let link = client.revoke_link(link_id).await?;
            println!("Link {} active: {}", link_id, link["is_active"]);
            Ok(())
        }
        Commands::Resolve { token } => {
            let resolved = client.resolve(&token).await?;
            print_item(&resolved["work_item"]);
            print_sub_items(&resolved["sub_items"]);
            Ok(())
        }
        Commands::Late { id, at } => {
            let lateness = client.lateness(id, at.as_deref()).await?;
            println!(
                "{} at {}: {}",
                id,
                str_field(&lateness, "at"),
                if lateness["is_late"].as_bool().unwrap_or(false) {
                    "late"
                } else {
                    "on time"
                }
            );
            Ok(())
        }
        Commands::Watch {
            work_item,
            assignee_only,
        } => run_watch(&client, work_item, assignee_only).await,
    }
}

async fn run_list(client: &HandoffClient, status: Option<&str>) -> Result<()> {
    let items = client.list_work_items(status).await?;
    let items = items.as_array().cloned().unwrap_or_default();

    if items.is_empty() {
        println!("No work items found.");
    } else {
        println!("Work items:");
        println!("{:─<60}", "");
        for item in &items {
            println!(
                "  {} - {} [{}{}]",
                str_field(item, "id"),
                str_field(item, "title"),
                str_field(item, "status"),
                if item["is_late"].as_bool().unwrap_or(false) { ", late" } else { "" }
            );
        }
    }

    Ok(())
}

async fn run_transition(client: &HandoffClient, id: Uuid, action: &str, body: Value) -> Result<()> {
    let item = client.transition(id, action, &body).await?;
    println!("{} is now {}", id, str_field(&item, "status"));
    Ok(())
}

async fn run_batches(
    client: &HandoffClient,
    id: Uuid,
    history: bool,
    label: Option<&str>,
) -> Result<()> {
    let batches = client.batches(id, history, label).await?;
    if history {
        for batch in batches.as_array().cloned().unwrap_or_default() {
            let primary = &batch["primary"];
            println!(
                "  v{} {} ({} file(s)){}",
                primary["version"],
                str_field(primary, "payload_ref"),
                batch["deliveries"].as_array().map(Vec::len).unwrap_or(0),
                match batch["decision"]["decision"].as_str() {
                    Some(decision) => format!(" - {decision}"),
                    None => String::new(),
                }
            );
        }
    } else {
        print_sub_items(&batches);
    }
    Ok(())
}

async fn run_decide(
    client: &HandoffClient,
    id: Uuid,
    label: Option<&str>,
    decision: &str,
    notes: Option<String>,
    attachments: Vec<Value>,
    token: Option<&str>,
) -> Result<()> {
    // A guest can only see the sub-items its link covers
    let sub_items = match token {
        Some(token) => client.resolve(token).await?["sub_items"].clone(),
        None => client.batches(id, false, None).await?,
    };
    let batch = find_current_batch(&sub_items, label)
        .ok_or_else(|| anyhow!("no delivered batch for {}", label.unwrap_or("the whole item")))?;

    let body = json!({
        "batch": batch,
        "decision": decision,
        "notes": notes,
        "attachments": attachments,
    });
    let feedback = match token {
        Some(token) => client.guest_decide(token, &body).await?,
        None => client.decide(&body).await?,
    };
    println!(
        "Recorded {} on {}",
        str_field(&feedback, "decision"),
        label.unwrap_or("the whole item")
    );
    Ok(())
}

async fn run_watch(client: &HandoffClient, work_item: Option<Uuid>, assignee_only: bool) -> Result<()> {
    println!("Listening for events...");
    client
        .watch(work_item, |msg| {
            match msg {
                ServerMessage::Event {
                    event,
                    notify_assignee,
                } => {
                    if notify_assignee || !assignee_only {
                        let marker = if notify_assignee { "*" } else { " " };
                        println!("{} {}", marker, describe_event(&event));
                    }
                }
                ServerMessage::Lagged { skipped } => {
                    tracing::warn!("Fell behind, {} event(s) skipped", skipped);
                }
                ServerMessage::Error { message } => {
                    tracing::error!("Server error: {}", message);
                }
                ServerMessage::Subscribed { work_item_id } => match work_item_id {
                    Some(id) => tracing::info!("Following work item {}", id),
                    None => tracing::info!("Following all work items"),
                },
                ServerMessage::Pong => {}
            }
            true
        })
        .await?;
    Ok(())
}

/// Turn `kind` / `kind:Label` arguments into manifest entries, numbering
/// labels per kind when none is given
fn build_manifest(args: &[String]) -> Result<Vec<Value>> {
    let mut per_kind: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
    let mut manifest = Vec::with_capacity(args.len());

    for (index, arg) in args.iter().enumerate() {
        let (kind, label) = match arg.split_once(':') {
            Some((kind, label)) => (kind.trim().to_lowercase(), Some(label.trim().to_string())),
            None => (arg.trim().to_lowercase(), None),
        };
        if kind.is_empty() {
            bail!("empty sub-item kind in {:?}", arg);
        }
        let count = per_kind.entry(kind.clone()).or_insert(0);
        *count += 1;
        let label = label.unwrap_or_else(|| format!("{} {}", capitalize(&kind), count));
        manifest.push(json!({
            "type": kind,
            "label": label,
            "ordinal": index + 1,
        }));
    }

    Ok(manifest)
}

fn build_attachments(images: &[String], audio: &[String]) -> Result<Vec<Value>> {
    let mut attachments: Vec<Value> = images
        .iter()
        .map(|reference| json!({"kind": "image", "reference": reference}))
        .collect();
    for arg in audio {
        let (reference, secs) = arg
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("audio attachment must be reference:seconds, got {:?}", arg))?;
        let secs: u32 = secs
            .parse()
            .map_err(|_| anyhow!("invalid audio duration in {:?}", arg))?;
        attachments.push(json!({"kind": "audio", "reference": reference, "duration_secs": secs}));
    }
    Ok(attachments)
}

fn find_current_batch(sub_items: &Value, label: Option<&str>) -> Option<Value> {
    sub_items
        .as_array()?
        .iter()
        .find(|view| view["label"].as_str() == label && !view["batch"].is_null())
        .map(|view| view["batch"].clone())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn str_field<'a>(value: &'a Value, field: &str) -> &'a str {
    value[field].as_str().unwrap_or("-")
}

fn print_item(item: &Value) {
    println!("{} - {}", str_field(item, "id"), str_field(item, "title"));
    println!("  status:    {}", str_field(item, "status"));
    println!(
        "  approved:  {}  revisions: {}",
        item["approved_count"], item["revision_count"]
    );
    if let Some(late) = item["is_late"].as_bool() {
        println!("  late:      {}", late);
    }
}

fn print_sub_items(sub_items: &Value) {
    for view in sub_items.as_array().cloned().unwrap_or_default() {
        let files = view["files"].as_array().map(Vec::len).unwrap_or(0);
        println!(
            "  {:<16} {:<20} v{} ({} attached file(s))",
            view["label"].as_str().unwrap_or("(whole item)"),
            str_field(&view, "status"),
            view["primary_delivery"]["version"],
            files
        );
    }
}
