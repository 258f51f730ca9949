use std::{collections::HashMap, hash::Hash};

struct Node<K, V> {
    key: Option<K>,
    val: Option<V>,
    weight: usize,
    prev: *mut Node<K, V>,
    next: *mut Node<K, V>,
}

impl<K, V> Node<K, V> {
    fn new(k: K, x: V, weight: usize) -> Self {
        Self {
            key: Some(k),
            val: Some(x),
            weight,
            prev: std::ptr::null_mut(),
            next: std::ptr::null_mut(),
        }
    }

    fn sentinel() -> Self {
        Self {
            key: None,
            val: None,
            weight: 0,
            prev: std::ptr::null_mut(),
            next: std::ptr::null_mut(),
        }
    }
}

/// Weighted LRU, `cap` bounds the sum of entry weights. Not thread safe, callers wrap it
/// in a lock.
pub struct LRUCache<K, V> {
    head: *mut Node<K, V>,
    map: HashMap<K, *mut Node<K, V>>,
    cap: usize,
    size: usize,
}

// nodes are only reachable through `&mut self`
unsafe impl<K: Send, V: Send> Send for LRUCache<K, V> {}

impl<K, V> LRUCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(cap: usize) -> Self {
        let p = Box::into_raw(Box::new(Node::sentinel()));
        unsafe {
            (*p).next = p;
            (*p).prev = p;
        }
        Self {
            head: p,
            map: HashMap::new(),
            cap,
            size: 0,
        }
    }

    pub fn add(&mut self, key: K, val: V, weight: usize) {
        match self.map.get(&key) {
            None => {
                let p = Box::into_raw(Box::new(Node::new(key.clone(), val, weight)));
                self.map.insert(key, p);
                self.push_back(p);
            }
            Some(&p) => unsafe {
                (*p).val.replace(val);
                self.size -= (*p).weight;
                (*p).weight = weight;
                self.move_back(p);
            },
        }
        self.size += weight;

        // the newest entry stays even when it alone exceeds the cap
        while self.size > self.cap && self.map.len() > 1 {
            let node = self.front();
            self.evict(node);
        }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        let p = *self.map.get(key)?;
        unsafe {
            self.move_back(p);
            (*p).val.as_ref()
        }
    }

    pub fn del(&mut self, key: &K) -> Option<V> {
        let p = self.map.remove(key)?;
        unsafe {
            self.remove_node(p);
            self.size -= (*p).weight;
            let mut node = Box::from_raw(p);
            node.val.take()
        }
    }

    pub fn clear(&mut self) {
        unsafe {
            let mut p = (*self.head).prev;
            while !p.eq(&self.head) {
                let prev = (*p).prev;
                let _ = Box::from_raw(p);
                p = prev;
            }
            (*self.head).next = self.head;
            (*self.head).prev = self.head;
        }
        self.map.clear();
        self.size = 0;
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn weight(&self) -> usize {
        self.size
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    fn evict(&mut self, node: *mut Node<K, V>) {
        unsafe {
            self.remove_node(node);
            self.size -= (*node).weight;
            if let Some(k) = (*node).key.as_ref() {
                self.map.remove(k);
            }
            let _ = Box::from_raw(node);
        }
    }

    fn push_back(&self, node: *mut Node<K, V>) {
        unsafe {
            (*node).next = (*self.head).next;
            (*(*self.head).next).prev = node;
            (*node).prev = self.head;
            (*self.head).next = node;
        }
    }

    fn front(&self) -> *mut Node<K, V> {
        unsafe { (*self.head).prev }
    }

    fn remove_node(&self, node: *mut Node<K, V>) {
        unsafe {
            let prev = (*node).prev;
            let next = (*node).next;
            (*prev).next = next;
            (*next).prev = prev;
        }
    }

    fn move_back(&self, node: *mut Node<K, V>) {
        self.remove_node(node);
        self.push_back(node);
    }
}

impl<K, V> Drop for LRUCache<K, V> {
    fn drop(&mut self) {
        unsafe {
            let mut p = (*self.head).next;
            while !p.eq(&self.head) {
                let next = (*p).next;
                let _ = Box::from_raw(p);
                p = next;
            }
            let _ = Box::from_raw(self.head);
        }
    }
}
