//! Persistent positional sequence based on a size-augmented AVL tree.
//!
//! This module provides [`PersistentSequence`], the ordered half of a
//! [`PersistentOrderedMap`](super::PersistentOrderedMap). Elements are
//! addressed by position; every subtree records its size so positional
//! operations descend in O(log N).
//!
//! # Overview
//!
//! - O(log N) `get`, `insert_at`, `remove_at`, `update_at`
//! - O(log N) `split_at`, `concat`, `remove_range`
//! - O(log N + k) `range`
//! - O(log N) `binary_search_by`, `partition_point`
//! - O(N) construction from a slice (perfectly balanced)
//! - O(1) `len`, `is_empty`, `clone`
//!
//! Updates copy only the nodes on the path they touch; everything else is
//! shared between versions through [`ReferenceCounter`].
//!
//! # Examples
//!
//! ```rust
//! use snapmap::persistent::PersistentSequence;
//!
//! let sequence: PersistentSequence<i32> = (0..5).collect();
//! let inserted = sequence.insert_at(2, 99);
//!
//! assert_eq!(sequence.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
//! assert_eq!(inserted.iter().copied().collect::<Vec<_>>(), vec![0, 1, 99, 2, 3, 4]);
//!
//! let trimmed = inserted.remove_range(1, 3);
//! assert_eq!(trimmed.iter().copied().collect::<Vec<_>>(), vec![0, 3, 4]);
//! ```
//!
//! # Internal Structure
//!
//! The tree keeps the AVL invariant: the heights of sibling subtrees differ
//! by at most one. `join` rebuilds balance when concatenating trees of
//! arbitrary heights, which makes range operations logarithmic.

use std::cmp::Ordering;
use std::fmt;
use std::iter::FromIterator;

use super::ReferenceCounter;

// =============================================================================
// Node Definition
// =============================================================================

struct Node<T> {
    element: T,
    left: Link<T>,
    right: Link<T>,
    height: u8,
    size: usize,
}

type Tree<T> = ReferenceCounter<Node<T>>;
type Link<T> = Option<Tree<T>>;

#[inline]
fn height<T>(link: &Link<T>) -> u8 {
    link.as_ref().map_or(0, |node| node.height)
}

#[inline]
fn size<T>(link: &Link<T>) -> usize {
    link.as_ref().map_or(0, |node| node.size)
}

fn make<T>(left: Link<T>, element: T, right: Link<T>) -> Tree<T> {
    let height = height(&left).max(height(&right)) + 1;
    let size = size(&left) + size(&right) + 1;
    ReferenceCounter::new(Node {
        element,
        left,
        right,
        height,
        size,
    })
}

/// Rebuilds a node whose children differ in height by at most two.
fn balance<T: Clone>(left: Link<T>, element: T, right: Link<T>) -> Tree<T> {
    let left_height = height(&left);
    let right_height = height(&right);

    if left_height > right_height + 1
        && let Some(pivot) = left.as_deref()
    {
        if height(&pivot.left) >= height(&pivot.right) {
            return make(
                pivot.left.clone(),
                pivot.element.clone(),
                Some(make(pivot.right.clone(), element, right)),
            );
        }
        if let Some(inner) = pivot.right.as_deref() {
            return make(
                Some(make(
                    pivot.left.clone(),
                    pivot.element.clone(),
                    inner.left.clone(),
                )),
                inner.element.clone(),
                Some(make(inner.right.clone(), element, right)),
            );
        }
    }

    if right_height > left_height + 1
        && let Some(pivot) = right.as_deref()
    {
        if height(&pivot.right) >= height(&pivot.left) {
            return make(
                Some(make(left, element, pivot.left.clone())),
                pivot.element.clone(),
                pivot.right.clone(),
            );
        }
        if let Some(inner) = pivot.left.as_deref() {
            return make(
                Some(make(left, element, inner.left.clone())),
                inner.element.clone(),
                Some(make(
                    inner.right.clone(),
                    pivot.element.clone(),
                    pivot.right.clone(),
                )),
            );
        }
    }

    make(left, element, right)
}

/// Concatenates `left ++ [element] ++ right` for trees of any heights.
fn join<T: Clone>(left: Link<T>, element: T, right: Link<T>) -> Tree<T> {
    let left_height = height(&left);
    let right_height = height(&right);

    if left_height > right_height + 1
        && let Some(node) = left.as_deref()
    {
        let joined = join(node.right.clone(), element, right);
        return balance(node.left.clone(), node.element.clone(), Some(joined));
    }

    if right_height > left_height + 1
        && let Some(node) = right.as_deref()
    {
        let joined = join(left, element, node.left.clone());
        return balance(Some(joined), node.element.clone(), node.right.clone());
    }

    make(left, element, right)
}

/// Concatenates two trees.
fn concat<T: Clone>(left: Link<T>, right: Link<T>) -> Link<T> {
    match right.as_deref() {
        None => left,
        Some(node) => {
            let (first, rest) = pop_first(node);
            Some(join(left, first, rest))
        }
    }
}

fn pop_first<T: Clone>(node: &Node<T>) -> (T, Link<T>) {
    match node.left.as_deref() {
        None => (node.element.clone(), node.right.clone()),
        Some(left) => {
            let (first, rest) = pop_first(left);
            (
                first,
                Some(balance(rest, node.element.clone(), node.right.clone())),
            )
        }
    }
}

/// Splits into `[0, index)` and `[index, len)`.
fn split<T: Clone>(link: &Link<T>, index: usize) -> (Link<T>, Link<T>) {
    match link.as_deref() {
        None => (None, None),
        Some(node) => {
            let left_size = size(&node.left);
            if index <= left_size {
                let (before, after) = split(&node.left, index);
                (
                    before,
                    Some(join(after, node.element.clone(), node.right.clone())),
                )
            } else {
                let (before, after) = split(&node.right, index - left_size - 1);
                (
                    Some(join(node.left.clone(), node.element.clone(), before)),
                    after,
                )
            }
        }
    }
}

fn insert_at<T: Clone>(link: &Link<T>, index: usize, element: T) -> Tree<T> {
    match link.as_deref() {
        None => make(None, element, None),
        Some(node) => {
            let left_size = size(&node.left);
            if index <= left_size {
                let left = insert_at(&node.left, index, element);
                balance(Some(left), node.element.clone(), node.right.clone())
            } else {
                let right = insert_at(&node.right, index - left_size - 1, element);
                balance(node.left.clone(), node.element.clone(), Some(right))
            }
        }
    }
}

fn remove_at<T: Clone>(node: &Node<T>, index: usize) -> Option<(Link<T>, T)> {
    let left_size = size(&node.left);
    match index.cmp(&left_size) {
        Ordering::Less => node.left.as_deref().and_then(|left| {
            let (left, removed) = remove_at(left, index)?;
            Some((
                Some(balance(left, node.element.clone(), node.right.clone())),
                removed,
            ))
        }),
        Ordering::Equal => Some((
            concat(node.left.clone(), node.right.clone()),
            node.element.clone(),
        )),
        Ordering::Greater => node.right.as_deref().and_then(|right| {
            let (right, removed) = remove_at(right, index - left_size - 1)?;
            Some((
                Some(balance(node.left.clone(), node.element.clone(), right)),
                removed,
            ))
        }),
    }
}

fn update_at<T: Clone>(node: &Node<T>, index: usize, element: T) -> Option<Tree<T>> {
    let left_size = size(&node.left);
    match index.cmp(&left_size) {
        Ordering::Less => {
            let left = update_at(node.left.as_deref()?, index, element)?;
            Some(make(Some(left), node.element.clone(), node.right.clone()))
        }
        Ordering::Equal => Some(make(node.left.clone(), element, node.right.clone())),
        Ordering::Greater => {
            let right = update_at(node.right.as_deref()?, index - left_size - 1, element)?;
            Some(make(node.left.clone(), node.element.clone(), Some(right)))
        }
    }
}

fn build<T: Clone>(elements: &[T]) -> Link<T> {
    if elements.is_empty() {
        return None;
    }
    let middle = elements.len() / 2;
    Some(make(
        build(&elements[..middle]),
        elements[middle].clone(),
        build(&elements[middle + 1..]),
    ))
}

// =============================================================================
// PersistentSequence Definition
// =============================================================================

/// A persistent sequence with logarithmic positional access.
///
/// `PersistentSequence` never reorders elements on its own; callers decide
/// where each element goes. When the elements are kept sorted by some key,
/// [`binary_search_by`](Self::binary_search_by) and
/// [`partition_point`](Self::partition_point) locate positions in O(log N).
///
/// # Time Complexity
///
/// | Operation          | Complexity |
/// |--------------------|------------|
/// | `get`              | O(log N)   |
/// | `insert_at`        | O(log N)   |
/// | `remove_at`        | O(log N)   |
/// | `update_at`        | O(log N)   |
/// | `remove_range`     | O(log N)   |
/// | `range`            | O(log N + k) |
/// | `insert_many_at`   | O(log N + k) |
/// | `binary_search_by` | O(log N)   |
/// | `len`              | O(1)       |
pub struct PersistentSequence<T> {
    root: Link<T>,
}

impl<T> PersistentSequence<T> {
    /// Creates an empty sequence.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self { root: None }
    }

    /// Returns the number of elements.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        size(&self.root)
    }

    /// Returns `true` if the sequence holds no elements.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Returns the element at `index`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use snapmap::persistent::PersistentSequence;
    ///
    /// let sequence: PersistentSequence<char> = "abc".chars().collect();
    /// assert_eq!(sequence.get(1), Some(&'b'));
    /// assert_eq!(sequence.get(3), None);
    /// ```
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        let mut link = self.root.as_deref();
        let mut index = index;
        while let Some(node) = link {
            let left_size = size(&node.left);
            match index.cmp(&left_size) {
                Ordering::Less => link = node.left.as_deref(),
                Ordering::Equal => return Some(&node.element),
                Ordering::Greater => {
                    index -= left_size + 1;
                    link = node.right.as_deref();
                }
            }
        }
        None
    }

    /// Returns the first element.
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        let mut node = self.root.as_deref()?;
        while let Some(left) = node.left.as_deref() {
            node = left;
        }
        Some(&node.element)
    }

    /// Returns the last element.
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        let mut node = self.root.as_deref()?;
        while let Some(right) = node.right.as_deref() {
            node = right;
        }
        Some(&node.element)
    }

    /// Binary-searches a sequence sorted consistently with `compare`.
    ///
    /// `compare` returns the ordering of an element relative to the target.
    /// Returns `Ok(index)` of a matching element, or `Err(index)` where a
    /// matching element could be inserted while keeping the order.
    pub fn binary_search_by<F>(&self, mut compare: F) -> Result<usize, usize>
    where
        F: FnMut(&T) -> Ordering,
    {
        let mut link = self.root.as_deref();
        let mut offset = 0;
        while let Some(node) = link {
            let left_size = size(&node.left);
            match compare(&node.element) {
                Ordering::Less => {
                    offset += left_size + 1;
                    link = node.right.as_deref();
                }
                Ordering::Greater => link = node.left.as_deref(),
                Ordering::Equal => return Ok(offset + left_size),
            }
        }
        Err(offset)
    }

    /// Returns the index of the first element for which `predicate` is false.
    ///
    /// The sequence must be partitioned: all elements satisfying the
    /// predicate come before all elements that do not.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use snapmap::persistent::PersistentSequence;
    ///
    /// let sequence: PersistentSequence<i32> = vec![1, 2, 2, 2, 5].into_iter().collect();
    /// assert_eq!(sequence.partition_point(|value| *value <= 2), 4);
    /// ```
    pub fn partition_point<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(&T) -> bool,
    {
        let mut link = self.root.as_deref();
        let mut offset = 0;
        while let Some(node) = link {
            if predicate(&node.element) {
                offset += size(&node.left) + 1;
                link = node.right.as_deref();
            } else {
                link = node.left.as_deref();
            }
        }
        offset
    }

    /// Returns an iterator over the elements in order.
    #[must_use]
    pub fn iter(&self) -> PersistentSequenceIterator<'_, T> {
        let mut iterator = PersistentSequenceIterator {
            stack: Vec::with_capacity(usize::from(height(&self.root))),
            remaining: self.len(),
        };
        iterator.descend_left(self.root.as_deref());
        iterator
    }
}

impl<T: Clone> PersistentSequence<T> {
    /// Builds a perfectly balanced sequence from a slice.
    #[must_use]
    pub fn from_slice(elements: &[T]) -> Self {
        Self {
            root: build(elements),
        }
    }

    /// Returns a new sequence with `element` appended.
    #[must_use]
    pub fn push_back(&self, element: T) -> Self {
        self.insert_at(self.len(), element)
    }

    /// Returns a new sequence with `element` at `index`.
    ///
    /// Indices past the end append.
    #[must_use]
    pub fn insert_at(&self, index: usize, element: T) -> Self {
        Self {
            root: Some(insert_at(&self.root, index.min(self.len()), element)),
        }
    }

    /// Returns a new sequence with `elements` spliced in at `index`.
    ///
    /// Indices past the end append.
    #[must_use]
    pub fn insert_many_at(&self, index: usize, elements: &[T]) -> Self {
        let (before, after) = split(&self.root, index.min(self.len()));
        Self {
            root: concat(concat(before, build(elements)), after),
        }
    }

    /// Returns a new sequence without the element at `index`, together with
    /// the removed element, or `None` if `index` is out of range.
    #[must_use]
    pub fn remove_at(&self, index: usize) -> Option<(Self, T)> {
        let (root, removed) = remove_at(self.root.as_deref()?, index)?;
        Some((Self { root }, removed))
    }

    /// Returns a new sequence with the element at `index` replaced, or `None`
    /// if `index` is out of range.
    #[must_use]
    pub fn update_at(&self, index: usize, element: T) -> Option<Self> {
        let root = update_at(self.root.as_deref()?, index, element)?;
        Some(Self { root: Some(root) })
    }

    /// Splits into `[0, index)` and `[index, len)`.
    #[must_use]
    pub fn split_at(&self, index: usize) -> (Self, Self) {
        let (before, after) = split(&self.root, index);
        (Self { root: before }, Self { root: after })
    }

    /// Returns `self ++ other`.
    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        Self {
            root: concat(self.root.clone(), other.root.clone()),
        }
    }

    /// Returns a new sequence without `[index, index + count)`.
    ///
    /// The range is clamped to the sequence bounds.
    #[must_use]
    pub fn remove_range(&self, index: usize, count: usize) -> Self {
        let (before, rest) = split(&self.root, index);
        let (_, after) = split(&rest, count);
        Self {
            root: concat(before, after),
        }
    }

    /// Returns an iterator over the elements in `[index, index + count)`.
    ///
    /// The range is clamped to the sequence bounds. The iterator starts by
    /// descending straight to `index`, so no earlier element is visited.
    #[must_use]
    pub fn range(&self, index: usize, count: usize) -> PersistentSequenceIterator<'_, T> {
        let start = index.min(self.len());
        let mut iterator = PersistentSequenceIterator {
            stack: Vec::with_capacity(usize::from(height(&self.root))),
            remaining: count.min(self.len() - start),
        };
        iterator.seek(self.root.as_deref(), start);
        iterator
    }

    /// Checks the AVL balance and size bookkeeping of every node.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        fn check<T>(link: &Link<T>) -> Option<(u8, usize)> {
            let Some(node) = link.as_deref() else {
                return Some((0, 0));
            };
            let (left_height, left_size) = check(&node.left)?;
            let (right_height, right_size) = check(&node.right)?;
            let balanced = left_height.abs_diff(right_height) <= 1
                && node.height == left_height.max(right_height) + 1
                && node.size == left_size + right_size + 1;
            balanced.then_some((node.height, node.size))
        }
        check(&self.root).is_some()
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// An in-order iterator over a [`PersistentSequence`].
pub struct PersistentSequenceIterator<'a, T> {
    stack: Vec<&'a Node<T>>,
    remaining: usize,
}

impl<'a, T> PersistentSequenceIterator<'a, T> {
    fn descend_left(&mut self, mut link: Option<&'a Node<T>>) {
        while let Some(node) = link {
            self.stack.push(node);
            link = node.left.as_deref();
        }
    }

    /// Leaves the element at `index` on top of the stack, with every
    /// ancestor that follows it below.
    fn seek(&mut self, mut link: Option<&'a Node<T>>, mut index: usize) {
        while let Some(node) = link {
            let left = size(&node.left);
            match index.cmp(&left) {
                Ordering::Less => {
                    self.stack.push(node);
                    link = node.left.as_deref();
                }
                Ordering::Equal => {
                    self.stack.push(node);
                    return;
                }
                Ordering::Greater => {
                    index -= left + 1;
                    link = node.right.as_deref();
                }
            }
        }
    }
}

impl<'a, T> Iterator for PersistentSequenceIterator<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.stack.pop()?;
        self.descend_left(node.right.as_deref());
        self.remaining -= 1;
        Some(&node.element)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for PersistentSequenceIterator<'_, T> {}

/// An owning in-order iterator over a [`PersistentSequence`].
///
/// Holds shared references to the tree nodes, so it stays valid no matter
/// what happens to the sequence it came from.
pub struct PersistentSequenceIntoIterator<T> {
    stack: Vec<Tree<T>>,
    remaining: usize,
}

impl<T> PersistentSequenceIntoIterator<T> {
    fn descend_left(&mut self, mut link: Link<T>) {
        while let Some(node) = link {
            link = node.left.clone();
            self.stack.push(node);
        }
    }
}

impl<T: Clone> Iterator for PersistentSequenceIntoIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.descend_left(node.right.clone());
        self.remaining -= 1;
        Some(node.element.clone())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T: Clone> ExactSizeIterator for PersistentSequenceIntoIterator<T> {}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<T> Clone for PersistentSequence<T> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
        }
    }
}

impl<T> Default for PersistentSequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> FromIterator<T> for PersistentSequence<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let elements: Vec<T> = iter.into_iter().collect();
        Self::from_slice(&elements)
    }
}

impl<T: Clone> IntoIterator for PersistentSequence<T> {
    type Item = T;
    type IntoIter = PersistentSequenceIntoIterator<T>;

    fn into_iter(self) -> Self::IntoIter {
        let mut iterator = PersistentSequenceIntoIterator {
            stack: Vec::with_capacity(usize::from(height(&self.root))),
            remaining: self.len(),
        };
        iterator.descend_left(self.root);
        iterator
    }
}

impl<'a, T> IntoIterator for &'a PersistentSequence<T> {
    type Item = &'a T;
    type IntoIter = PersistentSequenceIterator<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: PartialEq> PartialEq for PersistentSequence<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<T: Eq> Eq for PersistentSequence<T> {}

impl<T: fmt::Debug> fmt::Debug for PersistentSequence<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_list().entries(self.iter()).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
