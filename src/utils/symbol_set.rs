/// Ordered unique set backed by a left-leaning red-black tree
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::RwLock;

const RED: bool = true;
const BLACK: bool = false;

type Link<T> = Option<Box<Node<T>>>;

struct Node<T> {
    value: T,
    left: Link<T>,
    right: Link<T>,
    color: bool,
}

impl<T> Node<T> {
    fn new(value: T) -> Box<Self> {
        Box::new(Node {
            value,
            left: None,
            right: None,
            color: RED,
        })
    }
}

fn is_red<T>(link: &Link<T>) -> bool {
    link.as_ref().map_or(false, |n| n.color == RED)
}

/// Is the left child of `link` red
fn is_red_left<T>(link: &Link<T>) -> bool {
    link.as_ref().map_or(false, |n| is_red(&n.left))
}

fn rotate_left<T>(mut h: Box<Node<T>>) -> Box<Node<T>> {
    match h.right.take() {
        Some(mut x) => {
            h.right = x.left.take();
            x.color = h.color;
            h.color = RED;
            x.left = Some(h);
            x
        }
        None => h,
    }
}

fn rotate_right<T>(mut h: Box<Node<T>>) -> Box<Node<T>> {
    match h.left.take() {
        Some(mut x) => {
            h.left = x.right.take();
            x.color = h.color;
            h.color = RED;
            x.right = Some(h);
            x
        }
        None => h,
    }
}

fn flip_colors<T>(h: &mut Node<T>) {
    h.color = !h.color;
    if let Some(left) = h.left.as_mut() {
        left.color = !left.color;
    }
    if let Some(right) = h.right.as_mut() {
        right.color = !right.color;
    }
}

/// Restore the left-leaning invariants on the way back up
fn balance<T>(mut h: Box<Node<T>>) -> Box<Node<T>> {
    if is_red(&h.right) && !is_red(&h.left) {
        h = rotate_left(h);
    }
    if is_red(&h.left) && is_red_left(&h.left) {
        h = rotate_right(h);
    }
    if is_red(&h.left) && is_red(&h.right) {
        flip_colors(&mut h);
    }
    h
}

fn move_red_left<T>(mut h: Box<Node<T>>) -> Box<Node<T>> {
    flip_colors(&mut h);
    if is_red_left(&h.right) {
        h.right = h.right.take().map(rotate_right);
        h = rotate_left(h);
        flip_colors(&mut h);
    }
    h
}

fn move_red_right<T>(mut h: Box<Node<T>>) -> Box<Node<T>> {
    flip_colors(&mut h);
    if is_red_left(&h.left) {
        h = rotate_right(h);
        flip_colors(&mut h);
    }
    h
}

fn insert<T: Ord>(link: Link<T>, value: T, inserted: &mut bool) -> Box<Node<T>> {
    let mut h = match link {
        None => {
            *inserted = true;
            return Node::new(value);
        }
        Some(h) => h,
    };

    match value.cmp(&h.value) {
        Ordering::Less => h.left = Some(insert(h.left.take(), value, inserted)),
        Ordering::Greater => h.right = Some(insert(h.right.take(), value, inserted)),
        Ordering::Equal => {}
    }

    balance(h)
}

/// Remove the smallest node of the subtree, returning the new subtree and its value
fn delete_min<T>(mut h: Box<Node<T>>) -> (Link<T>, T) {
    if h.left.is_none() {
        let node = *h;
        return (node.right, node.value);
    }

    if !is_red(&h.left) && !is_red_left(&h.left) {
        h = move_red_left(h);
    }

    match h.left.take() {
        Some(left) => {
            let (new_left, min) = delete_min(left);
            h.left = new_left;
            (Some(balance(h)), min)
        }
        None => {
            let node = *h;
            (node.right, node.value)
        }
    }
}

/// Caller guarantees `value` is present in the subtree
fn delete<T: Ord>(mut h: Box<Node<T>>, value: &T) -> Link<T> {
    if *value < h.value {
        if !is_red(&h.left) && !is_red_left(&h.left) {
            h = move_red_left(h);
        }
        if let Some(left) = h.left.take() {
            h.left = delete(left, value);
        }
    } else {
        if is_red(&h.left) {
            h = rotate_right(h);
        }
        if *value == h.value && h.right.is_none() {
            return h.left.take();
        }
        if !is_red(&h.right) && !is_red_left(&h.right) {
            h = move_red_right(h);
        }
        if *value == h.value {
            if let Some(right) = h.right.take() {
                let (new_right, min) = delete_min(right);
                h.right = new_right;
                h.value = min;
            }
        } else if let Some(right) = h.right.take() {
            h.right = delete(right, value);
        }
    }
    Some(balance(h))
}

/// Self-balancing ordered set with O(log n) insert/remove/contains
pub struct RedBlackSet<T> {
    root: Link<T>,
    len: usize,
}

impl<T: Ord> RedBlackSet<T> {
    pub fn new() -> Self {
        RedBlackSet { root: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a value, returns false if it was already present
    pub fn insert(&mut self, value: T) -> bool {
        let mut inserted = false;
        let mut root = insert(self.root.take(), value, &mut inserted);
        root.color = BLACK;
        self.root = Some(root);
        if inserted {
            self.len += 1;
        }
        inserted
    }

    /// Remove a value, returns false if it was not present
    pub fn remove(&mut self, value: &T) -> bool {
        if !self.contains(value) {
            return false;
        }

        let mut root = match self.root.take() {
            Some(root) => root,
            None => return false,
        };

        if !is_red(&root.left) && !is_red(&root.right) {
            root.color = RED;
        }

        self.root = delete(root, value);
        if let Some(root) = self.root.as_mut() {
            root.color = BLACK;
        }
        self.len -= 1;
        true
    }

    pub fn contains(&self, value: &T) -> bool {
        let mut x = &self.root;
        while let Some(node) = x {
            match value.cmp(&node.value) {
                Ordering::Less => x = &node.left,
                Ordering::Greater => x = &node.right,
                Ordering::Equal => return true,
            }
        }
        false
    }

    /// In-order (ascending) iterator; each call starts a fresh traversal
    pub fn iter(&self) -> Iter<'_, T> {
        let mut iter = Iter { stack: Vec::new() };
        iter.push_left(&self.root);
        iter
    }

    #[cfg(test)]
    fn black_height(link: &Link<T>) -> Option<usize> {
        match link {
            None => Some(1),
            Some(node) => {
                if is_red(&node.right) {
                    return None;
                }
                if node.color == RED && is_red(&node.left) {
                    return None;
                }
                let left = Self::black_height(&node.left)?;
                let right = Self::black_height(&node.right)?;
                if left != right {
                    return None;
                }
                Some(left + usize::from(node.color == BLACK))
            }
        }
    }

    /// Root black, no red right links, no red-red, balanced black height
    #[cfg(test)]
    fn is_balanced(&self) -> bool {
        !is_red(&self.root) && Self::black_height(&self.root).is_some()
    }
}

impl<T: Ord> Default for RedBlackSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, T> {
    stack: Vec<&'a Node<T>>,
}

impl<'a, T> Iter<'a, T> {
    fn push_left(&mut self, mut link: &'a Link<T>) {
        while let Some(node) = link {
            self.stack.push(node);
            link = &node.left;
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(&node.right);
        Some(&node.value)
    }
}

/// Thread-safe watchlist of ticker symbols
///
/// One read-write lock guards the whole tree. `all()` returns a snapshot so
/// callers can iterate while other tasks insert or remove.
#[derive(Clone, Default)]
pub struct SymbolSet {
    inner: Arc<RwLock<RedBlackSet<String>>>,
}

impl SymbolSet {
    pub fn new() -> Self {
        SymbolSet {
            inner: Arc::new(RwLock::new(RedBlackSet::new())),
        }
    }

    /// Insert symbols, returns how many were new
    pub async fn insert<I, S>(&self, symbols: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = self.inner.write().await;
        symbols
            .into_iter()
            .map(|s| set.insert(s.into()))
            .filter(|inserted| *inserted)
            .count()
    }

    /// Remove symbols, returns how many were present
    pub async fn remove<I, S>(&self, symbols: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = self.inner.write().await;
        symbols
            .into_iter()
            .map(|s| set.remove(&s.as_ref().to_string()))
            .filter(|removed| *removed)
            .count()
    }

    pub async fn contains(&self, symbol: &str) -> bool {
        let set = self.inner.read().await;
        set.contains(&symbol.to_string())
    }

    /// Point-in-time snapshot in ascending order
    pub async fn all(&self) -> Vec<String> {
        let set = self.inner.read().await;
        set.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
