use crate::models::{Activity, ActivityGroup, Comment};
use indexmap::IndexMap;

/// Id-keyed activity cache. Iteration follows first-insertion order; an
/// overwrite keeps the record's original position.
#[derive(Debug, Clone, Default)]
pub struct ActivityRegistry {
    activities: IndexMap<String, Activity>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.activities.contains_key(id)
    }

    pub fn upsert(&mut self, activity: Activity) {
        self.activities.insert(activity.id.clone(), activity);
    }

    pub fn get(&self, id: &str) -> Option<&Activity> {
        self.activities.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Activity> {
        self.activities.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Activity> {
        self.activities.shift_remove(id)
    }

    pub fn clear(&mut self) {
        self.activities.clear();
    }

    pub fn values(&self) -> impl Iterator<Item = &Activity> {
        self.activities.values()
    }

    pub fn append_comment(&mut self, id: &str, comment: Comment) -> bool {
        match self.activities.get_mut(id) {
            Some(activity) => {
                activity.comments.push(comment);
                true
            }
            None => false,
        }
    }

    /// Activities sorted ascending by date and bucketed by UTC calendar day.
    /// Records sharing a timestamp keep insertion order.
    pub fn grouped_by_date(&self) -> Vec<ActivityGroup> {
        let mut sorted = self.activities.values().cloned().collect::<Vec<_>>();
        sorted.sort_by_key(|activity| activity.date);

        let mut groups: Vec<ActivityGroup> = Vec::new();
        for activity in sorted {
            let day = activity.date.date_naive();
            match groups.last_mut() {
                Some(group) if group.date == day => group.activities.push(activity),
                _ => groups.push(ActivityGroup {
                    date: day,
                    activities: vec![activity],
                }),
            }
        }
        groups
    }
}
