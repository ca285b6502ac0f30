//! Admin utilities for the master-side account tree: create accounts, move
//! budget around, inspect subtrees. Talks only to the master bank's HTTP
//! API.

use std::error::Error;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use api_types::{AccountKey, CurrencyPool};
use banker::{BudgetController, HttpLayer};

#[derive(Parser, Debug)]
#[command(name = "bidbank_admin")]
#[command(about = "Admin utilities for the master bank account tree")]
struct Cli {
    /// Master bank base URL (also read from `BANKER_URI`).
    #[arg(long, env = "BANKER_URI", default_value = "http://127.0.0.1:9985")]
    banker_uri: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Account(Account),
}

#[derive(Args, Debug)]
struct Account {
    #[command(subcommand)]
    command: AccountCommand,
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// Create a budget account.
    Add {
        /// Account path, e.g. `campaign:strategy`.
        key: AccountKey,
    },
    /// Transfer budget into an account.
    Topup {
        key: AccountKey,
        /// Amount, e.g. `10USD` or `100000USD/1M`.
        amount: CurrencyPool,
    },
    /// Set the absolute budget of a top-level account.
    SetBudget {
        top_level: String,
        amount: CurrencyPool,
    },
    /// Aggregated view of an account subtree.
    Summary {
        key: AccountKey,
        #[arg(long, default_value_t = 3)]
        depth: usize,
    },
    /// Raw master-side account snapshot.
    Get { key: AccountKey },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();

    let layer = HttpLayer::new(&cli.banker_uri)?;
    let controller = BudgetController::new(Arc::new(layer));

    let Command::Account(Account { command }) = cli.command;
    match command {
        AccountCommand::Add { key } => {
            controller.add_account(&key).await?;
            println!("created account: {key}");
        }
        AccountCommand::Topup { key, amount } => {
            controller.topup_transfer(&key, &amount).await?;
            println!("transferred {amount} to {key}");
        }
        AccountCommand::SetBudget { top_level, amount } => {
            controller.set_budget(&top_level, &amount).await?;
            println!("set budget of {top_level} to {amount}");
        }
        AccountCommand::Summary { key, depth } => {
            let summary = controller.summary(&key, depth).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        AccountCommand::Get { key } => {
            let account = controller.account(&key).await?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }
    }

    Ok(())
}
