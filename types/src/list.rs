//! List values and list definitions.
//!
//! A story list is a set of named flags, each carrying an integer value from
//! its definition. Lists support the usual set algebra (union, difference,
//! intersection, containment) and cast to int (maximum item value), float,
//! and string (item names sorted by value).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One item of a list value: its origin list name (when known) and item name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListItem {
    /// Name of the list definition this item came from, if known.
    pub origin: Option<String>,
    /// The item's own name.
    pub name: String,
}

impl ListItem {
    /// Build an item, treating an empty origin as unknown.
    #[must_use]
    pub fn new(origin: &str, name: &str) -> Self {
        Self {
            origin: if origin.is_empty() {
                None
            } else {
                Some(origin.to_string())
            },
            name: name.to_string(),
        }
    }

    /// Parse the `Origin.item` dotted form; a bare name has no origin.
    #[must_use]
    pub fn from_full_name(full: &str) -> Self {
        match full.split_once('.') {
            Some((origin, name)) => Self::new(origin, name),
            None => Self::new("", full),
        }
    }

    /// The `Origin.item` dotted form, or the bare name when origin-less.
    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.origin {
            Some(origin) => format!("{origin}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ListItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// A list value: item → integer value, plus the origin definitions the value
/// was built from (kept so an emptied list remembers its type).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryList {
    /// Items and their integer values, ordered for determinism.
    pub items: BTreeMap<ListItem, i32>,
    /// Names of the definitions this list draws from.
    pub origins: Vec<String>,
}

impl StoryList {
    /// Empty list with no origins.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-item list.
    #[must_use]
    pub fn single(item: ListItem, value: i32) -> Self {
        let mut list = Self::new();
        if let Some(origin) = &item.origin {
            list.origins.push(origin.clone());
        }
        list.items.insert(item, value);
        list
    }

    /// Insert an item.
    pub fn insert(&mut self, item: ListItem, value: i32) {
        self.items.insert(item, value);
    }

    /// Whether the item is present.
    #[must_use]
    pub fn contains(&self, item: &ListItem) -> bool {
        self.items.contains_key(item)
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Set union; values from `other` win on collision, origins merge.
    #[must_use]
    pub fn union(&self, other: &StoryList) -> StoryList {
        let mut items = self.items.clone();
        for (k, v) in &other.items {
            items.insert(k.clone(), *v);
        }
        let mut origins = self.origins.clone();
        for o in &other.origins {
            if !origins.contains(o) {
                origins.push(o.clone());
            }
        }
        StoryList { items, origins }
    }

    /// Set difference; keeps this list's origins.
    #[must_use]
    pub fn difference(&self, other: &StoryList) -> StoryList {
        let items = self
            .items
            .iter()
            .filter(|(k, _)| !other.contains(k))
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        StoryList {
            items,
            origins: self.origins.clone(),
        }
    }

    /// Set intersection; keeps this list's origins.
    #[must_use]
    pub fn intersect(&self, other: &StoryList) -> StoryList {
        let items = self
            .items
            .iter()
            .filter(|(k, _)| other.contains(k))
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        StoryList {
            items,
            origins: self.origins.clone(),
        }
    }

    /// Whether every item of `other` is in this list. Vacuously true for an
    /// empty `other`.
    #[must_use]
    pub fn contains_all(&self, other: &StoryList) -> bool {
        other.items.keys().all(|k| self.contains(k))
    }

    /// The items kept whose value lies in `[min, max]`.
    #[must_use]
    pub fn range(&self, min: i32, max: i32) -> StoryList {
        let items = self
            .items
            .iter()
            .filter(|(_, v)| **v >= min && **v <= max)
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        StoryList {
            items,
            origins: self.origins.clone(),
        }
    }

    /// The maximum item value, or 0 when empty. This is the list's int cast.
    #[must_use]
    pub fn max_value(&self) -> i32 {
        self.items.values().copied().max().unwrap_or(0)
    }

    /// Items sorted by their integer value (ties by item order).
    #[must_use]
    pub fn sorted_by_value(&self) -> Vec<(&ListItem, i32)> {
        let mut pairs: Vec<_> = self.items.iter().map(|(k, v)| (k, *v)).collect();
        pairs.sort_by_key(|(_, v)| *v);
        pairs
    }

    /// The string cast: item names sorted by value, comma separated.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (i, (item, _)) in self.sorted_by_value().into_iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&item.name);
        }
        out
    }
}

/// A named list definition from the compiled story's `listDefs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDefinition {
    /// The definition's name (the list item origin).
    pub name: String,
    /// Item name → integer value.
    pub items: BTreeMap<String, i32>,
}

impl ListDefinition {
    /// Build a definition.
    #[must_use]
    pub fn new(name: &str, items: BTreeMap<String, i32>) -> Self {
        Self {
            name: name.to_string(),
            items,
        }
    }

    /// The value of an item, if defined.
    #[must_use]
    pub fn value_of(&self, item_name: &str) -> Option<i32> {
        self.items.get(item_name).copied()
    }

    /// The item with the given value, if any.
    #[must_use]
    pub fn item_with_value(&self, value: i32) -> Option<ListItem> {
        self.items
            .iter()
            .find(|(_, v)| **v == value)
            .map(|(name, _)| ListItem::new(&self.name, name))
    }
}

/// All list definitions of a story, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDefinitions {
    /// Definition name → definition.
    pub lists: BTreeMap<String, ListDefinition>,
}

impl ListDefinitions {
    /// Empty definition set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a definition by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ListDefinition> {
        self.lists.get(name)
    }

    /// Register a definition.
    pub fn insert(&mut self, def: ListDefinition) {
        self.lists.insert(def.name.clone(), def);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> StoryList {
        let mut l = StoryList::new();
        l.insert(ListItem::new("Letters", "a"), 1);
        l.insert(ListItem::new("Letters", "b"), 2);
        l.insert(ListItem::new("Letters", "c"), 3);
        l.origins.push("Letters".into());
        l
    }

    #[test]
    fn set_algebra() {
        let all = abc();
        let just_b = StoryList::single(ListItem::new("Letters", "b"), 2);

        assert_eq!(all.difference(&just_b).len(), 2);
        assert_eq!(all.intersect(&just_b).items, just_b.items);
        assert!(all.contains_all(&just_b));
        assert!(!just_b.contains_all(&all));
        assert_eq!(all.union(&just_b).len(), 3);
    }

    #[test]
    fn text_cast_sorts_by_value() {
        let mut l = StoryList::new();
        l.insert(ListItem::new("L", "third"), 3);
        l.insert(ListItem::new("L", "first"), 1);
        l.insert(ListItem::new("L", "second"), 2);
        assert_eq!(l.to_text(), "first, second, third");
    }

    #[test]
    fn int_cast_is_max_value() {
        assert_eq!(abc().max_value(), 3);
        assert_eq!(StoryList::new().max_value(), 0);
    }

    #[test]
    fn full_name_round_trip() {
        let item = ListItem::new("Kit", "lamp");
        assert_eq!(ListItem::from_full_name(&item.full_name()), item);
        let bare = ListItem::new("", "lamp");
        assert_eq!(ListItem::from_full_name("lamp"), bare);
    }

    #[test]
    fn definition_lookup_both_ways() {
        let mut items = BTreeMap::new();
        items.insert("cold".to_string(), 1);
        items.insert("warm".to_string(), 2);
        let def = ListDefinition::new("Temp", items);

        assert_eq!(def.value_of("warm"), Some(2));
        assert_eq!(
            def.item_with_value(1),
            Some(ListItem::new("Temp", "cold"))
        );
        assert_eq!(def.item_with_value(9), None);
    }
}
