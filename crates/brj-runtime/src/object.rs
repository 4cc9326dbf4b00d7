use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::Arc;

use smol_str::SmolStr;

/// The uniform representation generated code passes around: the address of
/// an [`Object`] on the current thread's heap.
pub type Word = i64;

// ── Objects ──────────────────────────────────────────────────────

pub enum Object {
    Bool(bool),
    Int(i64),
    Str(String),
    Vector(im::Vector<Handle>),
    Set(im::OrdSet<Handle>),
    Map(im::OrdMap<Handle, Handle>),
    Fn(FnObject),
    Variant(VariantObject),
    /// Stand-in returned once a fault has been raised.
    Fault,
}

/// A callable: compiled code plus the values it closed over.
///
/// The code is called as `extern "C" fn(env: Word, args: Word...) -> Word`
/// where `env` is the word of this object.
pub struct FnObject {
    pub name: SmolStr,
    pub code: *const u8,
    pub arity: usize,
    pub captures: Box<[Cell<Word>]>,
}

pub struct VariantObject {
    pub constructor: Arc<ConstructorLayout>,
    pub fields: Box<[Cell<Word>]>,
}

/// Runtime marker for a declared data type.
#[derive(Debug, PartialEq, Eq)]
pub struct DataLayout {
    pub name: SmolStr,
}

/// Runtime shape of one constructor: a singleton for nullary constructors,
/// `arity` fields in declared order otherwise.
#[derive(Debug, PartialEq, Eq)]
pub struct ConstructorLayout {
    pub data_type: Arc<DataLayout>,
    pub name: SmolStr,
    pub tag: usize,
    pub arity: usize,
}

impl Object {
    pub fn kind(&self) -> &'static str {
        match self {
            Object::Bool(_) => "Bool",
            Object::Int(_) => "Int",
            Object::Str(_) => "Str",
            Object::Vector(_) => "vector",
            Object::Set(_) => "set",
            Object::Map(_) => "map",
            Object::Fn(_) => "function",
            Object::Variant(_) => "variant",
            Object::Fault => "fault",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Object::Bool(_) => 0,
            Object::Int(_) => 1,
            Object::Str(_) => 2,
            Object::Vector(_) => 3,
            Object::Set(_) => 4,
            Object::Map(_) => 5,
            Object::Fn(_) => 6,
            Object::Variant(_) => 7,
            Object::Fault => 8,
        }
    }

    /// Structural ordering, used for set membership and map keys.
    pub fn compare(&self, other: &Object) -> Ordering {
        match (self, other) {
            (Object::Bool(a), Object::Bool(b)) => a.cmp(b),
            (Object::Int(a), Object::Int(b)) => a.cmp(b),
            (Object::Str(a), Object::Str(b)) => a.cmp(b),
            (Object::Vector(a), Object::Vector(b)) => a.iter().cmp(b.iter()),
            (Object::Set(a), Object::Set(b)) => a.iter().cmp(b.iter()),
            (Object::Map(a), Object::Map(b)) => a.iter().cmp(b.iter()),
            (Object::Fn(a), Object::Fn(b)) => (a as *const FnObject).cmp(&(b as *const FnObject)),
            (Object::Variant(a), Object::Variant(b)) => a
                .constructor
                .data_type
                .name
                .cmp(&b.constructor.data_type.name)
                .then(a.constructor.tag.cmp(&b.constructor.tag))
                .then_with(|| {
                    a.fields
                        .iter()
                        .map(|c| Handle(c.get()))
                        .cmp(b.fields.iter().map(|c| Handle(c.get())))
                }),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

// ── Heap ─────────────────────────────────────────────────────────

const MIN_COLLECT_THRESHOLD: usize = 4096;
const GROWTH_FACTOR: usize = 2;

struct Heap {
    /// Reclaimed by [`collect`] once unreachable.
    objects: Vec<*mut Object>,
    /// Live until the thread exits: singletons, builtins and literals
    /// embedded in generated code.
    pinned: Vec<*mut Object>,
    /// Collectable object count at which [`should_collect`] fires.
    threshold: usize,
    true_word: Word,
    false_word: Word,
    fault_word: Word,
}

impl Heap {
    fn new() -> Self {
        let mut pinned = Vec::with_capacity(64);
        let mut pin = |obj: Object| {
            let ptr = Box::into_raw(Box::new(obj));
            pinned.push(ptr);
            ptr as Word
        };
        let true_word = pin(Object::Bool(true));
        let false_word = pin(Object::Bool(false));
        let fault_word = pin(Object::Fault);
        Self {
            objects: Vec::with_capacity(1024),
            pinned,
            threshold: MIN_COLLECT_THRESHOLD,
            true_word,
            false_word,
            fault_word,
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        for ptr in self.objects.drain(..).chain(self.pinned.drain(..)) {
            drop(unsafe { Box::from_raw(ptr) });
        }
    }
}

// Words are only ever dereferenced on the thread whose heap owns them.
thread_local! {
    static HEAP: RefCell<Heap> = RefCell::new(Heap::new());
}

/// Moves `obj` onto the current thread's heap.
pub fn alloc(obj: Object) -> Word {
    let ptr = Box::into_raw(Box::new(obj));
    HEAP.with(|heap| heap.borrow_mut().objects.push(ptr));
    ptr as Word
}

/// Like [`alloc`], but the object is never collected.
pub fn alloc_pinned(obj: Object) -> Word {
    let ptr = Box::into_raw(Box::new(obj));
    HEAP.with(|heap| heap.borrow_mut().pinned.push(ptr));
    ptr as Word
}

pub fn bool_word(b: bool) -> Word {
    HEAP.with(|heap| {
        let heap = heap.borrow();
        if b { heap.true_word } else { heap.false_word }
    })
}

pub fn fault_word() -> Word {
    HEAP.with(|heap| heap.borrow().fault_word)
}

/// Number of live objects on the current thread's heap, pinned ones included.
pub fn heap_size() -> usize {
    HEAP.with(|heap| {
        let heap = heap.borrow();
        heap.objects.len() + heap.pinned.len()
    })
}

/// Whether enough objects were allocated since the last collection to make
/// another one worthwhile.
pub fn should_collect() -> bool {
    HEAP.with(|heap| {
        let heap = heap.borrow();
        heap.objects.len() >= heap.threshold
    })
}

// ── Mark and sweep ───────────────────────────────────────────────

/// Frees every collectable object not reachable from `roots` or from a
/// pinned object, returning how many were freed.
///
/// # Safety
///
/// No word outside `roots` may be dereferenced afterwards unless it is
/// reachable from them. In particular no generated code may be running on
/// this thread, since its frames are not scanned.
pub unsafe fn collect(roots: impl IntoIterator<Item = Word>) -> usize {
    HEAP.with(|heap| {
        let mut heap = heap.borrow_mut();

        // Phase 1: mark from the roots and the pinned set
        let mut marked: HashSet<Word> = HashSet::new();
        let mut pending: Vec<Word> = roots.into_iter().collect();
        pending.extend(heap.pinned.iter().map(|ptr| *ptr as Word));
        while let Some(word) = pending.pop() {
            if word == 0 || !marked.insert(word) {
                continue;
            }
            push_children(unsafe { object(word) }, &mut pending);
        }

        // Phase 2: sweep
        let before = heap.objects.len();
        heap.objects.retain(|ptr| {
            let live = marked.contains(&(*ptr as Word));
            if !live {
                drop(unsafe { Box::from_raw(*ptr) });
            }
            live
        });
        let freed = before - heap.objects.len();

        heap.threshold = MIN_COLLECT_THRESHOLD.max(heap.objects.len() * GROWTH_FACTOR);
        log::debug!(
            "collected {} objects, {} live, next collection at {}",
            freed,
            heap.objects.len() + heap.pinned.len(),
            heap.threshold
        );
        freed
    })
}

fn push_children(obj: &Object, pending: &mut Vec<Word>) {
    match obj {
        Object::Vector(items) => pending.extend(items.iter().map(|h| h.0)),
        Object::Set(items) => pending.extend(items.iter().map(|h| h.0)),
        Object::Map(entries) => pending.extend(entries.iter().flat_map(|(k, v)| [k.0, v.0])),
        Object::Fn(f) => pending.extend(f.captures.iter().map(Cell::get)),
        Object::Variant(v) => pending.extend(v.fields.iter().map(Cell::get)),
        Object::Bool(_) | Object::Int(_) | Object::Str(_) | Object::Fault => {}
    }
}

/// Borrows the object behind `word`.
///
/// # Safety
///
/// `word` must have been produced on this thread by [`alloc`],
/// [`alloc_pinned`] or one of the singleton accessors, and not freed since.
pub unsafe fn object<'a>(word: Word) -> &'a Object {
    unsafe { &*(word as *const Object) }
}

/// A word ordered by the structure of the object it points at.
#[derive(Clone, Copy)]
pub struct Handle(pub(crate) Word);

impl Handle {
    pub fn word(self) -> Word {
        self.0
    }

    pub(crate) fn object<'a>(self) -> &'a Object {
        unsafe { object(self.0) }
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Handle {}

impl PartialOrd for Handle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Handle {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.0 == other.0 {
            return Ordering::Equal;
        }
        self.object().compare(other.object())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

// ── Link cells ───────────────────────────────────────────────────

/// The indirection every global reference goes through. Generated code loads
/// the word at offset 0; zero means the var is declared but not yet defined.
#[repr(C)]
#[derive(Debug)]
pub struct VarCell {
    value: AtomicI64,
    name: SmolStr,
}

impl VarCell {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            value: AtomicI64::new(0),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    pub fn get(&self) -> Option<Word> {
        match self.value.load(AtomicOrdering::Acquire) {
            0 => None,
            word => Some(word),
        }
    }

    pub fn set(&self, word: Word) {
        self.value.store(word, AtomicOrdering::Release);
    }

    pub fn is_bound(&self) -> bool {
        self.get().is_some()
    }

    /// Address generated code embeds to reach this cell.
    pub fn address(&self) -> i64 {
        self as *const VarCell as i64
    }
}
