use crate::contact::ContactKey;
use crate::keyed_shards::KeyedShards;

#[derive(Debug, Default)]
/// Last local calendar day (`YYYY-MM-DD`) each contact received the welcome unit.
pub struct DailyWelcomeMarks {
    days: KeyedShards<String>,
}

impl DailyWelcomeMarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_marked(&self, contact: &ContactKey, day: &str) -> bool {
        self.days
            .with_key(contact, |days| days.get(contact).is_some_and(|marked| marked == day))
    }

    /// Records `day` for `contact`; returns false when it was already marked.
    pub fn mark(&self, contact: &ContactKey, day: &str) -> bool {
        self.days.with_key(contact, |days| {
            match days.insert(contact.clone(), day.to_string()) {
                Some(previous) => previous != day,
                None => true,
            }
        })
    }
}
