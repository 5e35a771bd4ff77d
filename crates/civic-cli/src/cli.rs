use civic_core::config::{ClientConfig, ENV_ACCESS_TOKEN, ENV_SUPABASE_ANON_KEY, ENV_SUPABASE_URL};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "civic")]
#[command(about = "Follow municipal complaints from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Supabase project URL
    #[arg(long, global = true, env = ENV_SUPABASE_URL, value_name = "URL")]
    pub supabase_url: Option<String>,

    /// Supabase anon/public key
    #[arg(
        long = "anon-key",
        global = true,
        env = ENV_SUPABASE_ANON_KEY,
        hide_env_values = true,
        value_name = "KEY"
    )]
    pub supabase_anon_key: Option<String>,

    /// Citizen session access token
    #[arg(
        long,
        global = true,
        env = ENV_ACCESS_TOKEN,
        hide_env_values = true,
        value_name = "TOKEN"
    )]
    pub access_token: Option<String>,
}

impl Cli {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            access_token: self.access_token.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List a citizen's complaints, newest first
    #[command(alias = "list")]
    Complaints {
        /// Citizen whose complaints to list
        #[arg(long, value_name = "ID")]
        citizen: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the status history of one complaint
    Timeline {
        /// Complaint ID
        complaint_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Follow a citizen's complaints live until interrupted
    Watch {
        /// Citizen whose complaints to follow
        #[arg(long, value_name = "ID")]
        citizen: String,
        /// Complaint to select instead of the newest
        #[arg(long, value_name = "COMPLAINT_ID")]
        select: Option<String>,
    },
}
