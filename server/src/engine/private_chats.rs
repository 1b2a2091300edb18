use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use chrono::DateTime;
use tracing::{debug, warn};

use super::channel::ChannelId;
use super::events::{ChatSummary, MessageRecord, ServerEvent};
use super::hub::Hub;
use super::timestamps;
use crate::db::queries::{directory, messages};
use crate::error::HubError;

impl Hub {
    /// Every private chat a tutor takes part in: chats that already have
    /// messages plus chats implied by completed purchases, one entry per
    /// channel, newest activity first. Chats without messages sort last.
    pub async fn list_private_chats(&self, tutor_id: &str) -> Result<Vec<ChatSummary>, HubError> {
        if self
            .persist("get tutor", directory::get_user(self.db(), tutor_id))
            .await?
            .is_none()
        {
            return Err(HubError::NotFound(format!("User {tutor_id} not found")));
        }

        let refs = self
            .persist(
                "list private channels",
                messages::private_channel_refs_for_tutor(self.db(), tutor_id),
            )
            .await?;
        let enrollments = self
            .persist(
                "list enrollments",
                directory::completed_enrollments_for_tutor(self.db(), tutor_id),
            )
            .await?;

        let mut seen = HashSet::new();
        let mut pairs = Vec::new();
        let from_messages = refs.iter().filter_map(|r| match ChannelId::parse(r) {
            Some(ChannelId::Private {
                course_id,
                student_id,
                tutor_id: t,
            }) if t == tutor_id => Some((course_id, student_id)),
            _ => None,
        });
        let from_purchases = enrollments
            .into_iter()
            .map(|e| (e.course_id, e.student_id));
        for pair in from_messages.chain(from_purchases) {
            if seen.insert(pair.clone()) {
                pairs.push(pair);
            }
        }

        let mut course_titles: HashMap<String, String> = HashMap::new();
        let mut student_names: HashMap<String, String> = HashMap::new();
        let mut summaries = Vec::with_capacity(pairs.len());

        for (course_id, student_id) in pairs {
            if !course_titles.contains_key(&course_id) {
                let title = self
                    .persist("get course", directory::get_course(self.db(), &course_id))
                    .await?
                    .map(|c| c.title)
                    .unwrap_or_else(|| "Unknown course".to_string());
                course_titles.insert(course_id.clone(), title);
            }
            if !student_names.contains_key(&student_id) {
                let name = self
                    .persist("get student", directory::get_user(self.db(), &student_id))
                    .await?
                    .map(|u| u.display_name)
                    .unwrap_or_else(|| "Unknown student".to_string());
                student_names.insert(student_id.clone(), name);
            }

            let channel = ChannelId::private(&course_id, &student_id, tutor_id);
            let latest_message = self.latest_message(&channel).await?;

            summaries.push(ChatSummary {
                channel_id: channel.to_string(),
                course_title: course_titles.get(&course_id).cloned().unwrap_or_default(),
                student_name: student_names.get(&student_id).cloned().unwrap_or_default(),
                course_id,
                student_id,
                tutor_id: tutor_id.to_string(),
                latest_message,
            });
        }

        summaries.sort_by_key(|s| {
            Reverse(
                s.latest_message
                    .as_ref()
                    .map(|m| timestamps::sort_key(&m.timestamp))
                    .unwrap_or(DateTime::UNIX_EPOCH),
            )
        });

        debug!(%tutor_id, count = summaries.len(), "listed private chats");
        Ok(summaries)
    }

    async fn latest_message(&self, channel: &ChannelId) -> Result<Option<MessageRecord>, HubError> {
        let Some(row) = self
            .persist(
                "latest message",
                messages::latest_message(self.db(), &channel.to_string()),
            )
            .await?
        else {
            return Ok(None);
        };
        let reactions = self
            .persist("list reactions", messages::list_reactions(self.db(), &row.id))
            .await?;
        MessageRecord::from_row(row, &reactions).map(Some)
    }

    /// Push a refreshed inbox to the tutor, if they are online. Failures are logged only.
    pub(crate) async fn refresh_private_chats(&self, tutor_id: &str) {
        if self.registry.lookup(tutor_id).is_none() {
            return;
        }
        match self.list_private_chats(tutor_id).await {
            Ok(chats) => {
                self.registry
                    .send_to_user(tutor_id, ServerEvent::PrivateChats(chats));
            }
            Err(e) => warn!(%tutor_id, error = %e, "failed to refresh private chats"),
        }
    }
}
