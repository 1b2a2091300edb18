use std::collections::HashSet;
use std::fmt;

use super::events::SessionId;
use super::validation;
use crate::error::HubError;

/// An addressable broadcast group. Rendered textually as the channel reference
/// stored alongside messages (`community:g1`, `private:c1:s1:t1`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// Per-user notification and direct-delivery channel.
    User(String),
    /// Many-to-many group chat.
    Community(String),
    /// Exactly-two-party chat, named from its participants so either side can
    /// (re)join it independently.
    Private {
        course_id: String,
        student_id: String,
        tutor_id: String,
    },
    /// Transport-level call room populated by `join_room` and `joinVideoCall`.
    Room(String),
}

impl ChannelId {
    pub fn private(course_id: &str, student_id: &str, tutor_id: &str) -> Self {
        ChannelId::Private {
            course_id: course_id.to_string(),
            student_id: student_id.to_string(),
            tutor_id: tutor_id.to_string(),
        }
    }

    /// Parse a textual channel reference. Returns None for anything that is not
    /// one of the four known shapes or has an empty segment.
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, rest) = s.split_once(':')?;
        if rest.is_empty() {
            return None;
        }
        match kind {
            "user" => Some(ChannelId::User(rest.to_string())),
            "community" => Some(ChannelId::Community(rest.to_string())),
            "room" => Some(ChannelId::Room(rest.to_string())),
            "private" => {
                let mut parts = rest.split(':');
                let course_id = parts.next().filter(|p| !p.is_empty())?;
                let student_id = parts.next().filter(|p| !p.is_empty())?;
                let tutor_id = parts.next().filter(|p| !p.is_empty())?;
                if parts.next().is_some() {
                    return None;
                }
                Some(ChannelId::private(course_id, student_id, tutor_id))
            }
            _ => None,
        }
    }

    /// Reject channel ids with an empty component before they reach the registry.
    /// Private-chat components must also be well-formed identifiers, since they
    /// are joined with `:` into the stored channel reference.
    pub fn require_complete(&self) -> Result<(), HubError> {
        match self {
            ChannelId::User(id) if id.is_empty() => Err(HubError::missing("userId")),
            ChannelId::Community(id) if id.is_empty() => Err(HubError::missing("communityId")),
            ChannelId::Room(id) if id.is_empty() => Err(HubError::missing("roomId")),
            ChannelId::Private {
                course_id,
                student_id,
                tutor_id,
            } => {
                validation::require_identifier("courseId", course_id)?;
                validation::require_identifier("studentId", student_id)?;
                validation::require_identifier("tutorId", tutor_id)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, ChannelId::Private { .. })
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::User(id) => write!(f, "user:{id}"),
            ChannelId::Community(id) => write!(f, "community:{id}"),
            ChannelId::Private {
                course_id,
                student_id,
                tutor_id,
            } => write!(f, "private:{course_id}:{student_id}:{tutor_id}"),
            ChannelId::Room(id) => write!(f, "room:{id}"),
        }
    }
}

/// In-memory state for a single channel. Channels exist only while someone is joined.
#[derive(Debug, Default)]
pub struct ChannelState {
    /// Session IDs of currently joined connections.
    pub members: HashSet<SessionId>,
}
