//! Insertion-ordered in-memory document table.

use indexmap::IndexMap;

use crate::document::{Document, DocumentId};

/// One collection's documents, in insertion order.
///
/// Tables are cloned copy-on-write by a top-level write and swapped in whole
/// on commit, so a published table is never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct CollectionTable {
    docs: IndexMap<DocumentId, Document>,
}

impl CollectionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Returns true if the table holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Look up a document.
    #[must_use]
    pub fn get(&self, id: &DocumentId) -> Option<&Document> {
        self.docs.get(id)
    }

    /// Returns true if `id` is present.
    #[must_use]
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.docs.contains_key(id)
    }

    /// Documents in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.docs.values()
    }

    /// Owned copy of every document, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Document> {
        self.docs.values().cloned().collect()
    }

    /// Insert or replace. A replaced document keeps its position.
    pub(crate) fn put(&mut self, doc: Document) -> Option<Document> {
        self.docs.insert(doc.id, doc)
    }

    /// Remove, preserving the order of the remaining documents.
    pub(crate) fn remove(&mut self, id: &DocumentId) -> Option<Document> {
        self.docs.shift_remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn doc(n: i64) -> Document {
        let mut fields = serde_json::Map::new();
        fields.insert("n".to_string(), n.into());
        Document::new(DocumentId::new(), fields, Utc::now())
    }

    #[test]
    fn test_insertion_order_survives_replace_and_remove() {
        let mut table = CollectionTable::new();
        let (a, b, c) = (doc(1), doc(2), doc(3));
        table.put(a.clone());
        table.put(b.clone());
        table.put(c.clone());

        let mut b2 = b.clone();
        b2.fields.insert("n".to_string(), 20.into());
        assert!(table.put(b2).is_some());

        assert!(table.remove(&a.id).is_some());
        assert!(table.remove(&a.id).is_none());

        let order: Vec<f64> = table.iter().filter_map(|d| d.f64_field("n")).collect();
        assert_eq!(order, vec![20.0, 3.0]);
        assert_eq!(table.len(), 2);
        assert!(table.contains(&c.id));
    }
}
