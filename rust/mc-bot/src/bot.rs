//! Discord front-end: command registration, dispatch and presence.

use async_trait::async_trait;
use serenity::all::{
    ActivityData, CommandDataOptionValue, CommandInteraction, CommandOptionType, Context,
    CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseFollowup, CreateInteractionResponseMessage, EditInteractionResponse,
    EventHandler, GuildId, Http, Interaction, Ready,
};
use tracing::{debug, error, info, warn};

use crate::Outcome;
use crate::commands::{
    BotCommand, PING, Presence, SERVER, SERVER_DOWN, SERVER_UP, SOMETHING_WENT_WRONG, WHITELIST,
    WHITELIST_USER,
};
use crate::control::ServerControl;

/// Guild command set: `ping`, `server up|down`, `whitelist <user>`.
pub fn command_definitions() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new(PING).description("Pings the discord bot."),
        CreateCommand::new(SERVER)
            .description("Control the Minecraft Server")
            .add_option(CreateCommandOption::new(
                CommandOptionType::SubCommand,
                SERVER_UP,
                "Bring the server up",
            ))
            .add_option(CreateCommandOption::new(
                CommandOptionType::SubCommand,
                SERVER_DOWN,
                "Bring the server down",
            )),
        CreateCommand::new(WHITELIST)
            .description("Whitelist a Minecraft player")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    WHITELIST_USER,
                    "The username of the Minecraft player to whitelist",
                )
                .required(true),
            ),
    ]
}

/// Replace every guild command with [`command_definitions`].
pub async fn register_commands(http: &Http, guild_id: GuildId) -> serenity::Result<()> {
    let registered = guild_id.set_commands(http, command_definitions()).await?;
    for command in &registered {
        info!(command = %command.name, "Registered command");
    }
    Ok(())
}

/// Remove every guild command.
pub async fn remove_commands(http: &Http, guild_id: GuildId) -> serenity::Result<()> {
    guild_id.set_commands(http, Vec::new()).await?;
    info!(guild = %guild_id, "Removed guild commands");
    Ok(())
}

fn parse_interaction(interaction: &CommandInteraction) -> Option<BotCommand> {
    let options = &interaction.data.options;
    let subcommand = options
        .first()
        .filter(|option| matches!(option.value, CommandDataOptionValue::SubCommand(_)))
        .map(|option| option.name.as_str());
    let user = options
        .iter()
        .find(|option| option.name == WHITELIST_USER)
        .and_then(|option| option.value.as_str());

    BotCommand::parse(&interaction.data.name, subcommand, user)
}

fn set_presence(ctx: &Context, presence: &Presence) {
    debug!(presence = %presence.text(), "Updating presence");
    ctx.set_activity(Some(ActivityData::playing(presence.text())));
}

#[derive(Debug)]
pub struct Handler {
    control: ServerControl,
    guild_id: GuildId,
    /// Shown in the "server up" presence
    address: String,
}

impl Handler {
    pub fn new(control: ServerControl, guild_id: GuildId, address: impl Into<String>) -> Self {
        Self {
            control,
            guild_id,
            address: address.into(),
        }
    }

    async fn run(&self, ctx: &Context, command: &BotCommand) -> Outcome {
        match command {
            BotCommand::ServerUp => self.control.bring_up().await,
            BotCommand::ServerDown => self.control.bring_down().await,
            BotCommand::Whitelist(player) => {
                let (observed, outcome) = self.control.checked_whitelist(player).await;
                if let Some(up) = observed {
                    set_presence(ctx, &Presence::observed(up, &self.address));
                }
                outcome
            }
            BotCommand::Ping | BotCommand::UnknownSubcommand(_) => Outcome::ok(""),
        }
    }

    async fn handle(&self, ctx: &Context, interaction: &CommandInteraction) {
        let Some(command) = parse_interaction(interaction) else {
            warn!(command = %interaction.data.name, "Ignoring unregistered command");
            return;
        };
        info!(command = ?command, user = %interaction.user.name, "Command received");

        let acknowledgment = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new().content(command.acknowledgment()),
        );
        if let Err(e) = interaction.create_response(&ctx.http, acknowledgment).await {
            error!(error = %e, "Failed to acknowledge command");
            return;
        }
        if !command.has_followup() {
            return;
        }

        let outcome = self.run(ctx, &command).await;
        if let Some(presence) = Presence::after(&command, &outcome, &self.address) {
            set_presence(ctx, &presence);
        }

        let edit = EditInteractionResponse::new().content(command.final_text(&outcome));
        if let Err(e) = interaction.edit_response(&ctx.http, edit).await {
            warn!(error = %e, "Failed to edit command response");
            let followup = CreateInteractionResponseFollowup::new()
                .content(SOMETHING_WENT_WRONG)
                .ephemeral(true);
            if let Err(e) = interaction.create_followup(&ctx.http, followup).await {
                error!(error = %e, "Failed to send follow-up message");
            }
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, "Bot is up");

        if let Err(e) = register_commands(&ctx.http, self.guild_id).await {
            error!(guild = %self.guild_id, error = %e, "Cannot register commands");
        }

        match self.control.is_up().await {
            Ok(up) => set_presence(&ctx, &Presence::observed(up, &self.address)),
            Err(e) => warn!(error = %e, "Could not read server state for presence"),
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            self.handle(&ctx, &command).await;
        }
    }
}
