use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Keel OIDC session CLI")]
pub struct Cli {
    #[arg(long, env = "KEEL_STORAGE", help = "Session file (default ~/.keel/sessions.json)")]
    pub storage: Option<String>,
    #[arg(long, conflicts_with = "storage", help = "Keep sessions in the OS keyring")]
    pub keyring: bool,
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
    #[arg(long, help = "Allow http:// issuers and invalid TLS certificates")]
    pub insecure: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(about = "Start a session from an existing refresh token")]
    Login(LoginArgs),
    #[command(about = "Refresh a session and print its access token")]
    Refresh(SessionArgs),
    #[command(about = "Show whether a session is logged in")]
    Status(SessionArgs),
    Logout(SessionArgs),
}

#[derive(Args)]
pub struct LoginArgs {
    #[arg(long, env = "KEEL_ISSUER")]
    pub issuer: String,
    #[arg(long, env = "KEEL_CLIENT_ID")]
    pub client_id: String,
    #[arg(long, env = "KEEL_CLIENT_SECRET")]
    pub client_secret: Option<String>,
    #[arg(long, env = "KEEL_REFRESH_TOKEN")]
    pub refresh_token: String,
    #[arg(long)]
    pub redirect_url: Option<String>,
    #[arg(long)]
    pub session: Option<String>,
}

#[derive(Args)]
pub struct SessionArgs {
    #[arg(long)]
    pub session: Option<String>,
}
