use indexmap::IndexSet;

/// Bounded memory of recently applied mutation ids, oldest evicted first.
#[derive(Debug, Clone)]
pub struct SeenMutations {
    ids: IndexSet<String>,
    capacity: usize,
}

impl SeenMutations {
    /// Remember at most `capacity` ids, at least one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ids: IndexSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `mutation_id`. Returns `false` when it was already known.
    pub fn insert(&mut self, mutation_id: &str) -> bool {
        if self.ids.contains(mutation_id) {
            return false;
        }
        if self.ids.len() == self.capacity {
            self.ids.shift_remove_index(0);
        }
        self.ids.insert(mutation_id.to_string());
        true
    }

    /// Whether `mutation_id` was recorded and not evicted since.
    pub fn contains(&self, mutation_id: &str) -> bool {
        self.ids.contains(mutation_id)
    }

    /// Number of ids currently remembered.
    pub fn len(&self) -> usize {
        self.ids.len()
    }
}
