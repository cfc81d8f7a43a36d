//! Scope management for name resolution during compilation.
//!
//! Compiler blocks form a strict stack: one per open function, loop, or
//! branch construct. A name lookup walks the stack from the innermost block
//! outward; when the walk crosses a function boundary and lands on a local,
//! that local has been captured by a closure and is upgraded to `Ref` in
//! place, so every later lookup sees it as captured too.

use crate::value::Value;
use rustc_hash::FxHashMap;

/// Lexical scope classification of a resolved name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// A local in the current function, addressed by register.
    Local,
    /// A local captured by an inner function, addressed by name.
    Ref,
    /// Not lexically bound; addressed by name in the global table.
    Global,
}

/// The construct a compiler block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockContext {
    /// A function body (including the main prototype).
    Function,
    /// A loop body; collects pending `break` jumps.
    Loop,
    /// A conditional branch.
    Branch,
}

/// What the compiler knows about a declared name.
#[derive(Debug, Clone)]
pub struct NameInfo {
    /// True for `const` declarations.
    pub is_const: bool,
    /// The folded value; only set when `is_const`.
    pub value: Option<Value>,
    /// The register holding the value (meaningless for consts).
    pub reg: usize,
    /// How the name is addressed from the point of resolution.
    pub scope: ScopeKind,
}

/// A lexical block open during compilation.
#[derive(Debug)]
pub struct Block {
    /// The construct that opened this block.
    pub context: BlockContext,
    /// Code index where the block's body starts; loop blocks point their
    /// `continue` jumps here.
    pub start: usize,
    /// Next free register.
    pub register: usize,
    /// Names declared directly in this block.
    pub names: FxHashMap<String, NameInfo>,
    /// Code indices of `break` placeholders to patch on loop exit.
    pub pending_breaks: Vec<usize>,
}

/// The stack of open blocks; the innermost block is on top, and each block's
/// parent is the entry directly beneath it.
#[derive(Debug, Default)]
pub struct BlockStack {
    blocks: Vec<Block>,
}

impl BlockStack {
    /// Opens a new block.
    pub fn push(&mut self, context: BlockContext, start: usize, register: usize) {
        self.blocks.push(Block {
            context,
            start,
            register,
            names: FxHashMap::default(),
            pending_breaks: Vec::new(),
        });
    }

    /// Closes the innermost block and returns it.
    pub fn pop(&mut self) -> Block {
        self.blocks.pop().expect("block stack underflow")
    }

    /// The innermost open block.
    pub fn current(&self) -> &Block {
        self.blocks.last().expect("no open block")
    }

    /// The innermost open block, mutably.
    pub fn current_mut(&mut self) -> &mut Block {
        self.blocks.last_mut().expect("no open block")
    }

    /// Resolves `name` by walking the stack outward. Crossing at least one
    /// function boundary upgrades a resolved `Local` to `Ref` in place.
    /// Returns a snapshot of the (possibly upgraded) info.
    pub fn resolve(&mut self, name: &str) -> Option<NameInfo> {
        let mut closures = 0;
        for i in (0..self.blocks.len()).rev() {
            if let Some(info) = self.blocks[i].names.get_mut(name) {
                if closures > 0 && info.scope == ScopeKind::Local {
                    info.scope = ScopeKind::Ref;
                }
                return Some(info.clone());
            }
            if self.blocks[i].context == BlockContext::Function {
                closures += 1;
            }
        }
        None
    }

    /// Declares a name in the innermost block.
    pub fn declare(&mut self, name: &str, info: NameInfo) {
        self.current_mut().names.insert(name.to_string(), info);
    }

    /// True when the innermost block already declares `name`.
    pub fn declared_here(&self, name: &str) -> bool {
        self.current().names.contains_key(name)
    }

    /// Index of the loop block a `break`/`continue` in the current position
    /// refers to: the nearest enclosing loop within the current function.
    pub fn nearest_loop(&self) -> Option<usize> {
        for i in (0..self.blocks.len()).rev() {
            match self.blocks[i].context {
                BlockContext::Loop => return Some(i),
                BlockContext::Function => return None,
                BlockContext::Branch => {}
            }
        }
        None
    }

    /// The block at `index`, mutably.
    pub fn get_mut(&mut self, index: usize) -> &mut Block {
        &mut self.blocks[index]
    }
}
