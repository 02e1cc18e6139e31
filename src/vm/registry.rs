use super::types::{EventKind, GroupId, HandlerId, Program, SequenceId, TimingMode};

/// A program instantiated as a new sequence whenever its event fires
#[derive(Clone, Debug)]
pub struct Template {
    pub id: HandlerId,
    pub kind: EventKind,
    pub user_id: Option<i64>,
    pub mode: TimingMode,
    pub program: Program,
    pub parent: Option<SequenceId>,
    pub group: Option<GroupId>,
    pub active: bool,
}

impl Template {
    /// Templates without a user id respond to every firing of their kind
    pub fn matches(&self, kind: EventKind, user_id: Option<i64>) -> bool {
        if !self.active || self.kind != kind {
            return false;
        }
        match self.user_id {
            None => true,
            Some(id) => user_id == Some(id),
        }
    }
}

#[derive(Debug, Default)]
pub struct EventRegistry {
    templates: Vec<Template>,
    next_id: HandlerId,
}

impl EventRegistry {
    pub fn new() -> EventRegistry {
        EventRegistry {
            templates: Vec::new(),
            next_id: 1,
        }
    }

    pub fn register(
        &mut self,
        kind: EventKind,
        user_id: Option<i64>,
        mode: TimingMode,
        program: Program,
        parent: Option<SequenceId>,
        group: Option<GroupId>,
    ) -> HandlerId {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        self.templates.push(Template {
            id: id,
            kind: kind,
            user_id: user_id,
            mode: mode,
            program: program,
            parent: parent,
            group: group,
            active: true,
        });
        id
    }

    /// Active templates matching a firing, in registration order
    pub fn fire(&self, kind: EventKind, user_id: Option<i64>) -> Vec<Template> {
        self.templates
            .iter()
            .filter(|t| t.matches(kind, user_id))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: HandlerId) -> Option<&Template> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.templates.iter().filter(|t| t.active).count()
    }

    pub fn deactivate(&mut self, id: HandlerId) -> bool {
        self.deactivate_where(|t| t.id == id) > 0
    }

    /// Deactivate the handlers registered by a sequence
    pub fn deactivate_parent(&mut self, parent: SequenceId) -> usize {
        self.deactivate_where(|t| t.parent == Some(parent))
    }

    pub fn deactivate_group(&mut self, group: GroupId) -> usize {
        self.deactivate_where(|t| t.group == Some(group))
    }

    pub fn deactivate_all(&mut self) -> usize {
        self.deactivate_where(|_| true)
    }

    fn deactivate_where<F>(&mut self, pred: F) -> usize
    where
        F: Fn(&Template) -> bool,
    {
        let mut count = 0;
        for template in self.templates.iter_mut() {
            if template.active && pred(template) {
                template.active = false;
                count += 1;
            }
        }
        count
    }

    /// Drop inactive templates, returning how many were removed
    pub fn compact(&mut self) -> usize {
        let before = self.templates.len();
        self.templates.retain(|t| t.active);
        before - self.templates.len()
    }
}
