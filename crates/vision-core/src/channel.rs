//! Channel naming

/// The two kinds of channel the relay understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// One global latest value (servo movement)
    Primary,
    /// Latest value per reporting node
    Heartbeat,
}

/// Topic names for the primary and heartbeat channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    pub primary: String,
    pub heartbeat: String,
}

impl Channels {
    pub fn new(primary: impl Into<String>, heartbeat: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            heartbeat: heartbeat.into(),
        }
    }

    /// Standard topics for a team: `vision/<team>/movement` and `vision/<team>/heartbeat`
    pub fn for_team(team_id: &str) -> Self {
        Self::new(
            format!("vision/{}/movement", team_id),
            format!("vision/{}/heartbeat", team_id),
        )
    }

    /// Which channel a topic belongs to, if any
    pub fn classify(&self, topic: &str) -> Option<ChannelKind> {
        if topic == self.primary {
            Some(ChannelKind::Primary)
        } else if topic == self.heartbeat {
            Some(ChannelKind::Heartbeat)
        } else {
            None
        }
    }

    /// Both topics, primary first
    pub fn topics(&self) -> [&str; 2] {
        [&self.primary, &self.heartbeat]
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self::for_team(crate::DEFAULT_TEAM_ID)
    }
}
