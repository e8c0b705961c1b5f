//! LRU Index Module
//!
//! Access-ordered map used both to look entries up and to pick eviction victims.

use std::collections::HashMap;

// == Node ==
#[derive(Debug)]
struct Node<V> {
    key: String,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

// == LRU Index ==
/// Map from key to value that remembers access order.
///
/// Nodes live in a slab and are chained into a doubly linked list:
/// - Head = Least recently used
/// - Tail = Most recently used
///
/// Lookup, touch, insert and remove are all O(1).
#[derive(Debug)]
pub struct LruIndex<V> {
    slots: HashMap<String, usize>,
    nodes: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<V> Default for LruIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> LruIndex<V> {
    // == Constructor ==
    /// Creates a new empty index.
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    // == Insert ==
    /// Inserts `value` as the most recently used entry.
    ///
    /// Replaces and returns the previous value if the key was present.
    fn insert(&mut self, key: String, value: V) -> Option<V> {
        if let Some(&slot) = self.slots.get(&key) {
            self.move_to_tail(slot);
            let node = self.node_mut(slot);
            return Some(std::mem::replace(&mut node.value, value));
        }

        let node = Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.slots.insert(key, slot);
        self.link_tail(slot);
        None
    }

    // == Touch ==
    /// Marks a key as recently used and returns its value.
    pub fn touch(&mut self, key: &str) -> Option<&mut V> {
        let slot = *self.slots.get(key)?;
        self.move_to_tail(slot);
        Some(&mut self.node_mut(slot).value)
    }

    /// Marks a key as recently used, inserting `default()` first if it is absent.
    pub fn touch_or_insert_with<F>(&mut self, key: &str, default: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        let slot = match self.slots.get(key) {
            Some(&slot) => {
                self.move_to_tail(slot);
                slot
            }
            None => {
                self.insert(key.to_string(), default());
                // insert links new nodes at the tail
                match self.tail {
                    Some(slot) => slot,
                    None => unreachable!("tail is set after insert"),
                }
            }
        };
        &mut self.node_mut(slot).value
    }

    // == Get ==
    /// Returns the value without affecting access order.
    pub fn get(&self, key: &str) -> Option<&V> {
        let slot = *self.slots.get(key)?;
        self.nodes[slot].as_ref().map(|node| &node.value)
    }

    /// Returns the value mutably without affecting access order.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let slot = *self.slots.get(key)?;
        self.nodes[slot].as_mut().map(|node| &mut node.value)
    }

    // == Remove ==
    /// Removes a key and returns its value.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let slot = self.slots.remove(key)?;
        self.unlink(slot);
        self.free.push(slot);
        self.nodes[slot].take().map(|node| node.value)
    }

    // == Iteration ==
    /// Iterates from least to most recently used.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            index: self,
            cursor: self.head,
        }
    }

    /// Returns every key, least recently used first.
    pub fn keys(&self) -> Vec<String> {
        self.iter().map(|(key, _)| key.to_string()).collect()
    }

    // == Length ==
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    // == Linked List Plumbing ==
    fn node_mut(&mut self, slot: usize) -> &mut Node<V> {
        match self.nodes[slot].as_mut() {
            Some(node) => node,
            None => unreachable!("slot {} is linked but vacant", slot),
        }
    }

    fn move_to_tail(&mut self, slot: usize) {
        if self.tail == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.link_tail(slot);
    }

    fn link_tail(&mut self, slot: usize) {
        let old_tail = self.tail;
        {
            let node = self.node_mut(slot);
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(tail) => self.node_mut(tail).next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.node_mut(slot);
            (node.prev.take(), node.next.take())
        };
        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.tail = prev,
        }
    }
}

// == Iterator ==
/// Iterator over an [`LruIndex`], least recently used first.
pub struct Iter<'a, V> {
    index: &'a LruIndex<V>,
    cursor: Option<usize>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a str, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.index.nodes[self.cursor?].as_ref()?;
        self.cursor = node.next;
        Some((node.key.as_str(), &node.value))
    }
}
