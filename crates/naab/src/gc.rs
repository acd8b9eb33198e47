//! Cycle-collecting garbage collection over reference-counted containers.
//!
//! Plain `Rc` reclamation handles the acyclic common case. Cycles are broken
//! by a periodic mark-and-sweep: every container allocation registers a weak
//! handle in the tracked arena; when the allocation counter crosses the
//! threshold, a collection marks everything reachable from the environment
//! roots, then runs trial deletion over the unmarked candidates — a cell is
//! severed only when its entire strong count is accounted for by edges from
//! other unmarked candidates, i.e. when the unreachable values hold
//! reference-count edges only to one another. A cell still held from the
//! host stack therefore can never be severed.

use std::{
    cell::RefCell,
    collections::HashSet,
    rc::{Rc, Weak},
};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    env::Env,
    value::{StructValue, Value},
};

/// Default allocation threshold between automatic collections.
pub const DEFAULT_GC_THRESHOLD: usize = 1000;

enum Tracked {
    List(Weak<RefCell<Vec<Value>>>),
    Dict(Weak<RefCell<IndexMap<String, Value>>>),
    Struct(Weak<RefCell<StructValue>>),
}

impl Tracked {
    fn ptr(&self) -> usize {
        match self {
            Self::List(w) => w.as_ptr() as usize,
            Self::Dict(w) => w.as_ptr() as usize,
            Self::Struct(w) => w.as_ptr() as usize,
        }
    }

    fn is_alive(&self) -> bool {
        self.strong_count() > 0
    }

    fn strong_count(&self) -> usize {
        match self {
            Self::List(w) => w.strong_count(),
            Self::Dict(w) => w.strong_count(),
            Self::Struct(w) => w.strong_count(),
        }
    }

    fn upgrade(&self) -> Option<Value> {
        match self {
            Self::List(w) => w.upgrade().map(Value::List),
            Self::Dict(w) => w.upgrade().map(Value::Dict),
            Self::Struct(w) => w.upgrade().map(Value::Struct),
        }
    }
}

pub struct GcState {
    tracked: Vec<Tracked>,
    allocation_count: usize,
    threshold: usize,
    total_collected: usize,
}

impl GcState {
    pub fn new(threshold: usize) -> Self {
        Self {
            tracked: Vec::new(),
            allocation_count: 0,
            threshold,
            total_collected: 0,
        }
    }

    pub fn track_list(&mut self, cell: &Rc<RefCell<Vec<Value>>>) {
        self.tracked.push(Tracked::List(Rc::downgrade(cell)));
        self.allocation_count += 1;
    }

    pub fn track_dict(&mut self, cell: &Rc<RefCell<IndexMap<String, Value>>>) {
        self.tracked.push(Tracked::Dict(Rc::downgrade(cell)));
        self.allocation_count += 1;
    }

    pub fn track_struct(&mut self, cell: &Rc<RefCell<StructValue>>) {
        self.tracked.push(Tracked::Struct(Rc::downgrade(cell)));
        self.allocation_count += 1;
    }

    /// Counts a value-producing operation (binary/unary ops, ranges) toward
    /// the collection threshold.
    pub fn tick(&mut self) {
        self.allocation_count += 1;
    }

    pub fn should_collect(&self) -> bool {
        self.allocation_count >= self.threshold
    }

    /// Total number of values reclaimed by cycle severing so far.
    pub fn total_collected(&self) -> usize {
        self.total_collected
    }

    pub fn tracked_len(&self) -> usize {
        self.tracked.len()
    }

    /// Runs a full collection with the given environments as the root set.
    /// Returns the number of values severed in this cycle.
    pub fn collect(&mut self, roots: &[&Env]) -> usize {
        self.allocation_count = 0;
        self.tracked.retain(Tracked::is_alive);

        // Mark phase: everything reachable from the roots, following
        // container children and function closures.
        let mut marked: HashSet<usize> = HashSet::new();
        let mut visited_scopes: HashSet<usize> = HashSet::new();
        for root in roots {
            mark_env(root, &mut marked, &mut visited_scopes);
        }

        // Candidates: live tracked cells the mark never reached.
        let candidates: Vec<(usize, usize, Value)> = self
            .tracked
            .iter()
            .filter(|t| !marked.contains(&t.ptr()))
            .filter_map(|t| {
                let strong = t.strong_count();
                t.upgrade().map(|v| (t.ptr(), strong, v))
            })
            .collect();
        if candidates.is_empty() {
            return 0;
        }

        // Trial deletion: count, for each candidate, how many references to
        // it originate from other candidates.
        let candidate_ptrs: HashSet<usize> = candidates.iter().map(|(p, _, _)| *p).collect();
        let mut internal: AHashMap<usize, usize> = AHashMap::new();
        for (_, _, value) in &candidates {
            value.traverse(&mut |child| {
                if let Some(ptr) = container_ptr(child) {
                    if candidate_ptrs.contains(&ptr) {
                        *internal.entry(ptr).or_insert(0) += 1;
                    }
                }
            });
        }

        // Scan phase: a candidate whose strong count exceeds its internal
        // edges is held from outside the candidate set (an environment frame
        // or the host stack) and stays live — as does everything reachable
        // from it. `strong` was sampled before we held our own upgrades, so
        // no +1 adjustment is needed.
        let by_ptr: AHashMap<usize, &Value> =
            candidates.iter().map(|(p, _, v)| (*p, v)).collect();
        let mut live: HashSet<usize> = HashSet::new();
        let mut worklist: Vec<usize> = candidates
            .iter()
            .filter(|(ptr, strong, _)| *strong > internal.get(ptr).copied().unwrap_or(0))
            .map(|(ptr, _, _)| *ptr)
            .collect();
        while let Some(ptr) = worklist.pop() {
            if !live.insert(ptr) {
                continue;
            }
            if let Some(value) = by_ptr.get(&ptr) {
                value.traverse(&mut |child| {
                    if let Some(child_ptr) = container_ptr(child) {
                        if candidate_ptrs.contains(&child_ptr) && !live.contains(&child_ptr) {
                            worklist.push(child_ptr);
                        }
                    }
                });
            }
        }

        // What is left holds reference-count edges only to one another:
        // sever the edges and let refcounting finish the job.
        let mut severed = 0;
        for (ptr, _, value) in &candidates {
            if !live.contains(ptr) {
                sever(value);
                severed += 1;
            }
        }
        self.total_collected += severed;
        severed
    }
}

impl Default for GcState {
    fn default() -> Self {
        Self::new(DEFAULT_GC_THRESHOLD)
    }
}

fn container_ptr(value: &Value) -> Option<usize> {
    match value {
        Value::List(c) => Some(Rc::as_ptr(c) as usize),
        Value::Dict(c) => Some(Rc::as_ptr(c) as usize),
        Value::Struct(c) => Some(Rc::as_ptr(c) as usize),
        _ => None,
    }
}

fn mark_env(env: &Env, marked: &mut HashSet<usize>, visited_scopes: &mut HashSet<usize>) {
    let mut current = Some(env.clone());
    while let Some(scope) = current {
        if !visited_scopes.insert(scope.scope_ptr()) {
            return;
        }
        scope.for_each_binding(&mut |value| mark_value(value, marked, visited_scopes));
        current = scope.parent();
    }
}

fn mark_value(value: &Value, marked: &mut HashSet<usize>, visited_scopes: &mut HashSet<usize>) {
    match value {
        Value::List(_) | Value::Dict(_) | Value::Struct(_) => {
            let ptr = container_ptr(value).expect("container has a pointer");
            if !marked.insert(ptr) {
                return;
            }
            value.traverse(&mut |child| mark_value(child, marked, visited_scopes));
        }
        // Function closures keep their captured environment alive; anything
        // reachable through it is reachable.
        Value::Function(func) => {
            mark_env(&func.closure, marked, visited_scopes);
        }
        _ => {}
    }
}

/// Breaks a cell's outgoing edges so ordinary refcount reclamation can
/// finish the job.
fn sever(value: &Value) {
    match value {
        Value::List(items) => items.borrow_mut().clear(),
        Value::Dict(entries) => entries.borrow_mut().clear(),
        Value::Struct(instance) => {
            for field in &mut instance.borrow_mut().fields {
                *field = Value::Null;
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reachable_values_survive() {
        let mut gc = GcState::new(1);
        let env = Env::new();
        let list = Value::new_list(vec![Value::Int(1)], &mut gc);
        env.define("keep", list);
        assert_eq!(gc.collect(&[&env]), 0);
        assert_eq!(env.get("keep").unwrap().repr(), "[1]");
    }

    #[test]
    fn unreachable_self_cycle_is_collected_once() {
        let mut gc = GcState::new(1);
        let env = Env::new();
        {
            let list = Value::new_list(vec![], &mut gc);
            if let Value::List(cell) = &list {
                cell.borrow_mut().push(list.clone());
            }
            // The only named reference is dropped here.
        }
        let severed = gc.collect(&[&env]);
        assert_eq!(severed, 1);
        assert_eq!(gc.total_collected(), 1);
        // Nothing left alive in the arena after severing.
        assert_eq!(gc.collect(&[&env]), 0);
    }

    #[test]
    fn cycle_held_from_host_stack_is_kept() {
        let mut gc = GcState::new(1);
        let env = Env::new();
        let list = Value::new_list(vec![], &mut gc);
        if let Value::List(cell) = &list {
            cell.borrow_mut().push(list.clone());
        }
        // `list` still lives on the host stack: strong count exceeds the
        // internal edge count, so trial deletion keeps it.
        assert_eq!(gc.collect(&[&env]), 0);
        assert_eq!(list.repr(), "[[...]]");
    }

    #[test]
    fn two_cell_cycle_collects_together() {
        let mut gc = GcState::new(1);
        let env = Env::new();
        {
            let a = Value::new_list(vec![], &mut gc);
            let b = Value::new_list(vec![a.clone()], &mut gc);
            if let Value::List(cell) = &a {
                cell.borrow_mut().push(b.clone());
            }
        }
        assert_eq!(gc.collect(&[&env]), 2);
    }

    #[test]
    fn values_held_only_by_unrooted_scopes_survive() {
        let mut gc = GcState::new(1);
        let root_env = Env::new();
        // A scope the collector does not know about still holds strong
        // references; nothing reachable through it may be severed.
        let hidden_env = Env::new();
        let inner = Value::new_list(vec![Value::Int(1), Value::Int(2)], &mut gc);
        let outer = Value::new_list(vec![inner], &mut gc);
        hidden_env.define("c", outer);
        assert_eq!(gc.collect(&[&root_env]), 0);
        assert_eq!(hidden_env.get("c").unwrap().repr(), "[[1, 2]]");
    }

    #[test]
    fn cycle_reachable_through_closure_env_survives() {
        let mut gc = GcState::new(1);
        let env = Env::new();
        let list = Value::new_list(vec![], &mut gc);
        if let Value::List(cell) = &list {
            cell.borrow_mut().push(list.clone());
        }
        let closure_env = Env::new();
        closure_env.define("captured", list);
        // Simulate a function value rooted in `env` capturing `closure_env`.
        let decl = Rc::new(crate::ast::FunctionDecl {
            name: "f".to_owned(),
            type_params: vec![],
            params: vec![],
            return_type: None,
            body: vec![],
            span: crate::token::Span::default(),
            exported: false,
        });
        let func = Value::Function(Rc::new(crate::value::FunctionValue {
            name: "f".to_owned(),
            decl,
            closure: closure_env,
            source_file: "test".to_owned(),
            source_line: 1,
            inferred_return: RefCell::new(None),
        }));
        env.define("f", func);
        assert_eq!(gc.collect(&[&env]), 0);
    }
}
