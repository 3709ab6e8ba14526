use mpa_core::notify::{ActionKind, ParticipantView};
use mpa_core::settings::LeafPath;
use serde::Serialize;

pub const AUTHORIZE_ACTION_ID: &str = "mpa.authorize.v1";
pub const DENY_ACTION_ID: &str = "mpa.deny.v1";
pub const CANCEL_ACTION_ID: &str = "mpa.cancel.v1";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    #[serde(rename = "plain_text")]
    Plain { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Plain { text } | Self::Mrkdwn { text } => text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Danger,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "button")]
pub struct ButtonElement {
    pub action_id: String,
    pub text: TextObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<ButtonStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ButtonElement {
    pub fn new(action_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self { action_id: action_id.into(), text: TextObject::plain(label), style: None, value: None }
    }

    pub fn style(mut self, style: ButtonStyle) -> Self {
        self.style = Some(style);
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Actions { block_id: String, elements: Vec<ButtonElement> },
    Context { block_id: String, elements: Vec<TextObject> },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

impl MessageTemplate {
    pub fn buttons(&self) -> impl Iterator<Item = &ButtonElement> {
        self.blocks.iter().flat_map(|block| match block {
            Block::Actions { elements, .. } => elements.as_slice(),
            _ => &[],
        })
    }
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    pub fn actions<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ActionsBuilder),
    {
        let mut builder = ActionsBuilder::default();
        build(&mut builder);
        let elements = builder.build();
        if !elements.is_empty() {
            self.blocks.push(Block::Actions { block_id: block_id.into(), elements });
        }
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Context { block_id: block_id.into(), elements: builder.build() });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(""))
    }
}

#[derive(Default)]
pub struct ActionsBuilder {
    elements: Vec<ButtonElement>,
}

impl ActionsBuilder {
    pub fn button(&mut self, button: ButtonElement) -> &mut Self {
        self.elements.push(button);
        self
    }

    fn build(self) -> Vec<ButtonElement> {
        self.elements
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

pub fn action_id(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Approve => AUTHORIZE_ACTION_ID,
        ActionKind::Deny => DENY_ACTION_ID,
        ActionKind::Cancel => CANCEL_ACTION_ID,
    }
}

pub fn action_kind_from_id(action_id: &str) -> Option<ActionKind> {
    match action_id {
        AUTHORIZE_ACTION_ID => Some(ActionKind::Approve),
        DENY_ACTION_ID => Some(ActionKind::Deny),
        CANCEL_ACTION_ID => Some(ActionKind::Cancel),
        _ => None,
    }
}

/// Renders a participant's view as a direct message. Each offered action becomes a button whose
/// value carries the authorization id.
pub fn participant_message(view: &ParticipantView) -> MessageTemplate {
    MessageBuilder::new(view.text.clone())
        .section("mpa.request.summary.v1", |section| {
            section.mrkdwn(view.text.clone());
        })
        .actions("mpa.request.actions.v1", |actions| {
            for action in &view.actions {
                let mut button = ButtonElement::new(action_id(action.kind), action.kind.label())
                    .value(action.authorization_id.0.clone());
                match action.kind {
                    ActionKind::Approve => button = button.style(ButtonStyle::Primary),
                    ActionKind::Deny => button = button.style(ButtonStyle::Danger),
                    ActionKind::Cancel => {}
                }
                actions.button(button);
            }
        })
        .build()
}

pub fn acknowledgment_message(text: &str) -> MessageTemplate {
    MessageBuilder::new(text.to_owned())
        .section("mpa.ack.v1", |section| {
            section.plain(text.to_owned());
        })
        .build()
}

pub fn error_message(summary: &str, correlation_id: &str) -> MessageTemplate {
    MessageBuilder::new(summary.to_owned())
        .section("mpa.error.summary.v1", |section| {
            section.mrkdwn(format!(":warning: {summary}"));
        })
        .context("mpa.error.context.v1", |context| {
            context.plain(format!("Correlation ID: {correlation_id}"));
        })
        .build()
}

pub fn help_message(leaves: &[LeafPath]) -> MessageTemplate {
    let mut listing = String::from(
        "*Usage*\n`/mpa <field> <field> ... <value>` starts an authorization request.\n\
         `/mpa <field> <field> ...` shows the current value.\n\n*Fields*",
    );
    if leaves.is_empty() {
        listing.push_str("\n_No configuration fields are available._");
    }
    for leaf in leaves {
        let segments = leaf.path.segments().join(" ");
        listing.push_str(&format!("\n• `{segments}` ({})", leaf.kind_description()));
    }

    MessageBuilder::new("MPA command help")
        .section("mpa.help.summary.v1", |section| {
            section.mrkdwn(listing);
        })
        .build()
}
