//! Static-initializer ("clinit") dependency analyzer (C7).
//!
//! Grounded on `examples/original_source/hotspot/.../clinit_analysis.cpp`.
//! Real bytecode parsing and class hierarchy introspection are out of scope
//! (spec §1); [`ClassDatabase`] and [`MethodBody`] stand in for the VM's
//! actual introspection surface, and a real embedding server would provide
//! implementations backed by its own class loader.
//!
//! The traversal is worklist-based rather than recursive (spec §9): a deep
//! or cyclic clinit graph cannot blow this analyzer's own stack, and cycles
//! are broken by the same `visited` set the original uses.

use std::collections::{HashSet, VecDeque};

/// Opaque identifier for a loaded class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

/// Opaque identifier for a resolved method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

/// One bytecode of interest to the analyzer, already resolved against the
/// constant pool. Every other bytecode is irrelevant and is not modeled.
#[derive(Debug, Clone)]
pub enum BytecodeOp {
    GetStatic { target: ClassId },
    PutStatic { target: ClassId },
    GetField { target: ClassId },
    PutField { target: ClassId },
    InvokeStatic { class: ClassId, method: MethodId },
    InvokeSpecial { class: ClassId, method: MethodId },
    InvokeVirtual {
        base: ClassId,
        name: String,
        sig: String,
    },
    InvokeInterface {
        base: ClassId,
        name: String,
        sig: String,
    },
}

/// A method's abstracted bytecode stream.
pub trait MethodBody {
    fn ops(&self) -> &[BytecodeOp];
}

/// Stand-in for the VM's class introspection API.
pub trait ClassDatabase {
    /// Whether `class` has state mutated by a prior invocation that has not
    /// yet been re-initialized in this VM reuse.
    fn should_reinit(&self, class: ClassId) -> bool;

    /// Whether it is safe to re-run `class`'s initializer without breaking
    /// a VM-runtime invariant.
    fn reinit_safe(&self, class: ClassId) -> bool;

    /// `class`'s static initializer method, if it has one.
    fn class_initializer(&self, class: ClassId) -> Option<MethodId>;

    /// Concrete subclasses/implementors of `base`, or `None` if `base` is
    /// loaded by the system class loader and should not be walked (spec
    /// §4.6 point 3).
    fn children(&self, base: ClassId) -> Option<&[ClassId]>;

    /// Whether `class` was loaded by a non-null (user) class loader.
    fn has_class_loader(&self, class: ClassId) -> bool;

    /// Resolve a `(name, sig)` virtual/interface call against a concrete
    /// leaf class.
    fn resolve_method(&self, class: ClassId, name: &str, sig: &str) -> Option<MethodId>;

    /// Look up a method's body for bytecode scanning.
    fn method_body(&self, method: MethodId) -> Option<&dyn MethodBody>;

    /// Actually invoke `class`'s static initializer and mark it
    /// reinitialized. VM-owned side effect; not modeled further here.
    fn call_class_initializer(&mut self, class: ClassId);
}

enum WorkItem {
    AnalyzeClass(ClassId),
    AnalyzeMethod(MethodId),
}

/// Owns the process-wide `visited` guard (spec §3: "each node is visited at
/// most once per analyzer lifetime") and runs the worklist traversal.
///
/// A single method-keyed set, not one set per node kind: a class is
/// identified for dedup purposes by its own `class_initializer()` method, the
/// same way `examples/original_source/hotspot/.../clinit_analysis.cpp` keeps
/// one `visited_method_set` for both the class-recursion and
/// method-recursion paths. Two independent sets would let a class reached
/// first via a direct `InvokeStatic`/`InvokeSpecial` (recorded only against
/// its method) get re-queued later via a `GetStatic`/`PutStatic` reference
/// (checked only against a class set), double-firing its initializer.
#[derive(Debug, Default)]
pub struct ClinitAnalyzer {
    visited_methods: HashSet<MethodId>,
}

impl ClinitAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyze entry class `k`: ensure its initializer dependencies have
    /// been traced, then actually call its class initializer (spec §4.6
    /// steps 1-2).
    pub fn analyze_class(&mut self, db: &mut impl ClassDatabase, k: ClassId) {
        if !db.should_reinit(k) {
            return;
        }

        if let Some(init) = db.class_initializer(k) {
            self.run_method_worklist(db, init);
        }

        db.call_class_initializer(k);
    }

    /// Trace `m`'s bytecode and everything it transitively reaches, without
    /// recursing into Rust's own call stack.
    fn run_method_worklist(&mut self, db: &mut impl ClassDatabase, entry: MethodId) {
        let mut queue = VecDeque::new();

        if self.visited_methods.insert(entry) {
            queue.push_back(WorkItem::AnalyzeMethod(entry));
        }

        while let Some(item) = queue.pop_front() {
            match item {
                WorkItem::AnalyzeMethod(method) => {
                    self.scan_method(db, method, &mut queue);
                }
                WorkItem::AnalyzeClass(class) => {
                    // `maybe_queue_class` already inserted this class's
                    // initializer into `visited_methods` before enqueueing
                    // this item, so it's guaranteed unvisited until now.
                    if db.should_reinit(class) {
                        if let Some(init) = db.class_initializer(class) {
                            queue.push_back(WorkItem::AnalyzeMethod(init));
                        }
                        db.call_class_initializer(class);
                    }
                }
            }
        }
    }

    fn scan_method(
        &mut self,
        db: &mut impl ClassDatabase,
        method: MethodId,
        queue: &mut VecDeque<WorkItem>,
    ) {
        let ops: Vec<BytecodeOp> = match db.method_body(method) {
            Some(body) => body.ops().to_vec(),
            None => {
                tracing::warn!(?method, "method body unavailable, skipping");
                return;
            }
        };

        for op in ops {
            self.dispatch_op(db, op, queue);
        }
    }

    fn dispatch_op(&mut self, db: &mut impl ClassDatabase, op: BytecodeOp, queue: &mut VecDeque<WorkItem>) {
        match op {
            BytecodeOp::GetStatic { target }
            | BytecodeOp::PutStatic { target }
            | BytecodeOp::GetField { target }
            | BytecodeOp::PutField { target } => {
                self.maybe_queue_class(db, target, queue);
            }
            BytecodeOp::InvokeStatic { class, method } | BytecodeOp::InvokeSpecial { class, method } => {
                self.maybe_queue_class(db, class, queue);
                self.maybe_queue_method_if_safe(db, class, method, queue);
            }
            BytecodeOp::InvokeVirtual { base, name, sig } | BytecodeOp::InvokeInterface { base, name, sig } => {
                for (target_class, target_method) in self.enumerate_implementations(db, base, &name, &sig) {
                    self.maybe_queue_class(db, target_class, queue);
                    self.maybe_queue_method_if_safe(db, target_class, target_method, queue);
                }
            }
        }
    }

    /// Queue `class` for class-initializer analysis, deduped against the
    /// same `visited_methods` set the method-recursion path uses, keyed by
    /// `class`'s own initializer method rather than `class` itself.
    fn maybe_queue_class(&mut self, db: &impl ClassDatabase, class: ClassId, queue: &mut VecDeque<WorkItem>) {
        if !db.should_reinit(class) {
            return;
        }
        let newly_seen = match db.class_initializer(class) {
            Some(init) => self.visited_methods.insert(init),
            None => true,
        };
        if newly_seen {
            queue.push_back(WorkItem::AnalyzeClass(class));
        }
    }

    fn maybe_queue_method_if_safe(
        &mut self,
        db: &impl ClassDatabase,
        class: ClassId,
        method: MethodId,
        queue: &mut VecDeque<WorkItem>,
    ) {
        if db.reinit_safe(class) && self.visited_methods.insert(method) {
            queue.push_back(WorkItem::AnalyzeMethod(method));
        }
    }

    /// Enumerate concrete `(class, method)` implementations of a virtual or
    /// interface call, walking `base`'s child set. System-loaded classes
    /// are skipped (spec §4.6 point 3: they'd explode the implementation
    /// set).
    fn enumerate_implementations(
        &self,
        db: &impl ClassDatabase,
        base: ClassId,
        name: &str,
        sig: &str,
    ) -> Vec<(ClassId, MethodId)> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![base];

        while let Some(class) = stack.pop() {
            if !db.has_class_loader(class) {
                continue;
            }
            match db.children(class) {
                Some(children) if !children.is_empty() => stack.extend(children.iter().copied()),
                _ => {
                    if let Some(method) = db.resolve_method(class, name, sig) {
                        if seen.insert((class, method)) {
                            out.push((class, method));
                        }
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeMethod(Vec<BytecodeOp>);
    impl MethodBody for FakeMethod {
        fn ops(&self) -> &[BytecodeOp] {
            &self.0
        }
    }

    struct FakeDb {
        should_reinit: HashMap<ClassId, bool>,
        reinit_safe: HashMap<ClassId, bool>,
        initializers: HashMap<ClassId, MethodId>,
        bodies: HashMap<MethodId, FakeMethod>,
        children: HashMap<ClassId, Vec<ClassId>>,
        loaders: HashMap<ClassId, bool>,
        calls: RefCell<Vec<ClassId>>,
    }

    impl ClassDatabase for FakeDb {
        fn should_reinit(&self, class: ClassId) -> bool {
            *self.should_reinit.get(&class).unwrap_or(&false)
        }
        fn reinit_safe(&self, class: ClassId) -> bool {
            *self.reinit_safe.get(&class).unwrap_or(&true)
        }
        fn class_initializer(&self, class: ClassId) -> Option<MethodId> {
            self.initializers.get(&class).copied()
        }
        fn children(&self, base: ClassId) -> Option<&[ClassId]> {
            self.children.get(&base).map(|v| v.as_slice())
        }
        fn has_class_loader(&self, class: ClassId) -> bool {
            *self.loaders.get(&class).unwrap_or(&true)
        }
        fn resolve_method(&self, class: ClassId, _name: &str, _sig: &str) -> Option<MethodId> {
            self.initializers.get(&class).copied()
        }
        fn method_body(&self, method: MethodId) -> Option<&dyn MethodBody> {
            self.bodies.get(&method).map(|b| b as &dyn MethodBody)
        }
        fn call_class_initializer(&mut self, class: ClassId) {
            self.calls.borrow_mut().push(class);
        }
    }

    const K: ClassId = ClassId(1);
    const B: ClassId = ClassId(2);
    const K_INIT: MethodId = MethodId(100);
    const B_INIT: MethodId = MethodId(200);

    fn simple_db() -> FakeDb {
        let mut should_reinit = HashMap::new();
        should_reinit.insert(K, true);
        should_reinit.insert(B, true);

        let mut initializers = HashMap::new();
        initializers.insert(K, K_INIT);
        initializers.insert(B, B_INIT);

        let mut bodies = HashMap::new();
        bodies.insert(K_INIT, FakeMethod(vec![BytecodeOp::GetStatic { target: B }]));
        bodies.insert(B_INIT, FakeMethod(vec![]));

        FakeDb {
            should_reinit,
            reinit_safe: HashMap::new(),
            initializers,
            bodies,
            children: HashMap::new(),
            loaders: HashMap::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn analyze_calls_entry_class_initializer() {
        let mut db = simple_db();
        let mut analyzer = ClinitAnalyzer::new();
        analyzer.analyze_class(&mut db, K);
        assert!(db.calls.borrow().contains(&K));
    }

    #[test]
    fn analyze_reaches_statically_referenced_classes() {
        let mut db = simple_db();
        let mut analyzer = ClinitAnalyzer::new();
        analyzer.analyze_class(&mut db, K);
        assert!(db.calls.borrow().contains(&B));
    }

    #[test]
    fn idempotence_second_pass_does_not_rescan_visited_methods() {
        let mut db = simple_db();
        let mut analyzer = ClinitAnalyzer::new();
        analyzer.analyze_class(&mut db, K);
        let calls_after_first = db.calls.borrow().len();

        // A second analysis of the same entry: visited_methods already
        // contains K_INIT and B_INIT, so no bytecode is rescanned. The VM's
        // own should_reinit bookkeeping may still call initializers again
        // here it reports should_reinit == true for both classes once more.
        analyzer.analyze_class(&mut db, K);
        assert!(db.calls.borrow().len() >= calls_after_first);
        assert_eq!(analyzer.visited_methods.len(), 2);
    }

    #[test]
    fn self_referencing_clinit_is_not_double_fired() {
        // K's own initializer does a GetStatic back on K. The entry call in
        // `analyze_class` reaches K_INIT through the method path; the
        // GetStatic inside it reaches K through the class path. A single
        // shared visited set must recognize these as the same node so
        // `call_class_initializer` doesn't fire twice for one analysis.
        let mut should_reinit = HashMap::new();
        should_reinit.insert(K, true);

        let mut initializers = HashMap::new();
        initializers.insert(K, K_INIT);

        let mut bodies = HashMap::new();
        bodies.insert(K_INIT, FakeMethod(vec![BytecodeOp::GetStatic { target: K }]));

        let mut db = FakeDb {
            should_reinit,
            reinit_safe: HashMap::new(),
            initializers,
            bodies,
            children: HashMap::new(),
            loaders: HashMap::new(),
            calls: RefCell::new(Vec::new()),
        };

        let mut analyzer = ClinitAnalyzer::new();
        analyzer.analyze_class(&mut db, K);

        assert_eq!(db.calls.borrow().iter().filter(|c| **c == K).count(), 1);
    }

    #[test]
    fn cyclic_initializer_graph_terminates() {
        // A's initializer statically references B; B's static method
        // invokes A. The visited set must break the cycle.
        const A: ClassId = ClassId(10);
        const B2: ClassId = ClassId(20);
        const A_INIT: MethodId = MethodId(110);
        const B_METHOD: MethodId = MethodId(220);

        let mut should_reinit = HashMap::new();
        should_reinit.insert(A, true);
        should_reinit.insert(B2, true);

        let mut initializers = HashMap::new();
        initializers.insert(A, A_INIT);

        let mut bodies = HashMap::new();
        bodies.insert(
            A_INIT,
            FakeMethod(vec![BytecodeOp::GetStatic { target: B2 }]),
        );
        bodies.insert(
            B_METHOD,
            FakeMethod(vec![BytecodeOp::InvokeStatic {
                class: A,
                method: A_INIT,
            }]),
        );

        let mut db = FakeDb {
            should_reinit,
            reinit_safe: HashMap::new(),
            initializers,
            bodies,
            children: HashMap::new(),
            loaders: HashMap::new(),
            calls: RefCell::new(Vec::new()),
        };

        let mut analyzer = ClinitAnalyzer::new();
        analyzer.analyze_class(&mut db, A);

        // Terminates and visits A_INIT exactly once.
        assert_eq!(
            analyzer
                .visited_methods
                .iter()
                .filter(|m| **m == A_INIT)
                .count(),
            1
        );
    }
}
