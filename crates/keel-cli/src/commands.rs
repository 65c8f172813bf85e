use keel_client::ClientAuthentication;
use keel_core::session_fields::ISSUER;
use keel_core::{LoginOptions, Secret};
use uuid::Uuid;

use crate::cli_args::{LoginArgs, SessionArgs};
use crate::config::{ensure_secure_issuer, resolve_session, CliConfig};

pub(crate) struct CommandContext<'a> {
    pub auth: &'a ClientAuthentication,
    pub allow_insecure: bool,
    pub config: &'a mut CliConfig,
}

pub(crate) async fn handle_login(args: LoginArgs, ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
    ensure_secure_issuer(&args.issuer, ctx.allow_insecure)?;
    let session_id = args
        .session
        .unwrap_or_else(|| Uuid::now_v7().to_string());
    let options = LoginOptions {
        session_id: session_id.clone(),
        oidc_issuer: Some(args.issuer),
        client_id: Some(args.client_id),
        client_secret: args.client_secret.map(Secret::from),
        refresh_token: Some(Secret::from(args.refresh_token)),
        redirect_url: args.redirect_url,
        dpop: false,
    };
    let info = ctx.auth.login(&options, None).await?;
    ctx.config.current_session = Some(info.session_id.clone());
    println!("{}", info.session_id);
    Ok(())
}

pub(crate) async fn handle_refresh(
    args: SessionArgs,
    ctx: &mut CommandContext<'_>,
) -> anyhow::Result<()> {
    let session_id = resolve_session(args.session, ctx.config)?;
    if let Some(issuer) = ctx
        .auth
        .storage()
        .get_for_user_key(&session_id, ISSUER)
        .await?
    {
        ensure_secure_issuer(&issuer, ctx.allow_insecure)?;
    }
    let access_token = ctx.auth.access_token(&session_id, None).await?;
    println!("{}", access_token.expose());
    Ok(())
}

pub(crate) async fn handle_status(
    args: SessionArgs,
    ctx: &mut CommandContext<'_>,
) -> anyhow::Result<()> {
    let session_id = resolve_session(args.session, ctx.config)?;
    let info = ctx.auth.session_info(&session_id).await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

pub(crate) async fn handle_logout(
    args: SessionArgs,
    ctx: &mut CommandContext<'_>,
) -> anyhow::Result<()> {
    let session_id = resolve_session(args.session, ctx.config)?;
    ctx.auth.logout(&session_id).await?;
    if ctx.config.current_session.as_deref() == Some(session_id.as_str()) {
        ctx.config.current_session = None;
    }
    println!("logged out {session_id}");
    Ok(())
}
