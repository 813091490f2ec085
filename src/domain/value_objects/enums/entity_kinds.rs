use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Plan,
    Subscription,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            EntityKind::User => "user",
            EntityKind::Plan => "plan",
            EntityKind::Subscription => "subscription",
        };
        write!(f, "{}", kind)
    }
}
