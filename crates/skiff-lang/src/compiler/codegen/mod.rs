//! Code generation from AST to register bytecode.
//!
//! This module contains the single-pass compiler that walks a parsed tree
//! and produces a [`FuncProto`] per function, performing lexical scope
//! resolution, constant folding, register allocation, and jump
//! back-patching along the way.
//!
//! ## The register request protocol
//!
//! Expression arms receive an optional [`ExprInfo`] describing where their
//! value should go:
//!
//! - `rega` is the destination register when the value must be
//!   materialized.
//! - With `propagate` set, the expression may instead report through `regb`
//!   where the value already lives: a register (a local's slot, or `rega`
//!   after materializing), or a constant-pool index biased by
//!   [`OP_CONST_OFFSET`].
//! - Without a request at all (statement position) the expression allocates
//!   a fresh register, which the enclosing block discards afterwards.
//!
//! The protocol is what keeps `MOVE`s out of the stream: operators consume
//! locals and constants in place instead of copying them into temporaries.

mod fold;
mod scope;

pub mod expressions;
pub mod statements;

#[cfg(test)]
mod tests;

use crate::ast::Node;
use crate::compiler::bytecode::{
    FuncProto, Instr, LineInfo, Opcode, ARRAY_MAX_REGISTERS, MAX_CONSTS, OP_CONST_OFFSET,
};
use crate::error::CompileError;
use crate::lexer::TokenKind;
use crate::value::Value;
use fold::const_fold;
use scope::{BlockContext, BlockStack, NameInfo, ScopeKind};

/// Register request handed to an expression visit.
#[derive(Debug, Clone, Copy)]
struct ExprInfo {
    /// Whether the expression may report an existing location via `regb`
    /// instead of materializing into `rega`.
    propagate: bool,
    /// Destination register.
    rega: usize,
    /// On entry, the top of the result window (calls fan out into
    /// `rega..=regb`); on exit under propagation, where the value lives.
    regb: usize,
}

impl ExprInfo {
    /// A plain "materialize into `reg`" request.
    fn at(reg: usize) -> Self {
        Self {
            propagate: false,
            rega: reg,
            regb: reg,
        }
    }

    /// A propagating request rooted at `reg`.
    fn propagating(reg: usize) -> Self {
        Self {
            propagate: true,
            rega: reg,
            regb: reg,
        }
    }
}

/// Compiles the root node of a parsed program into the main function
/// prototype.
pub fn compile(root: &Node, filename: &str) -> Result<FuncProto, CompileError> {
    tracing::debug!(file = %filename, "compiling");
    let mut codegen = Codegen::new(filename);
    codegen.compile_node(root, None)?;
    codegen.return_guard();

    let proto = codegen.protos.pop().expect("main prototype");
    tracing::debug!(
        file = %filename,
        instructions = proto.code.len(),
        constants = proto.consts.len(),
        functions = proto.funcs.len(),
        "compiled main prototype"
    );
    Ok(proto)
}

/// The bytecode compiler.
struct Codegen {
    filename: String,
    /// Last line recorded in a line table; shared across nested prototypes.
    last_line: usize,
    /// Prototypes under construction; the innermost function is on top, the
    /// main prototype at the bottom.
    protos: Vec<FuncProto>,
    blocks: BlockStack,
}

impl Codegen {
    fn new(filename: &str) -> Self {
        let mut blocks = BlockStack::default();
        blocks.push(BlockContext::Function, 0, 0);
        Self {
            filename: filename.to_string(),
            last_line: 0,
            protos: vec![FuncProto::new(filename)],
            blocks,
        }
    }

    // ========================================================================
    // Emission helpers
    // ========================================================================

    fn proto(&self) -> &FuncProto {
        self.protos.last().expect("prototype stack")
    }

    fn emit(&mut self, instr: Instr, line: usize) -> usize {
        let last_line = self.last_line;
        let proto = self.protos.last_mut().expect("prototype stack");
        proto.code.push(instr);
        if line != last_line || proto.lines.is_empty() {
            proto.lines.push(LineInfo {
                instr: proto.code.len() - 1,
                line,
            });
            self.last_line = line;
        }
        proto.code.len() - 1
    }

    fn emit_ab(&mut self, op: Opcode, a: usize, b: usize, line: usize) -> usize {
        self.emit(Instr::ab(op, a, b), line)
    }

    fn emit_abc(&mut self, op: Opcode, a: usize, b: usize, c: usize, line: usize) -> usize {
        self.emit(Instr::abc(op, a, b, c), line)
    }

    fn emit_abx(&mut self, op: Opcode, a: usize, bx: usize, line: usize) -> usize {
        self.emit(Instr::abx(op, a, bx), line)
    }

    fn emit_asbx(&mut self, op: Opcode, a: usize, sbx: i32, line: usize) -> usize {
        self.emit(Instr::asbx(op, a, sbx), line)
    }

    fn modify_asbx(&mut self, index: usize, op: Opcode, a: usize, sbx: i32) {
        let proto = self.protos.last_mut().expect("prototype stack");
        if index < proto.code.len() {
            proto.code[index] = Instr::asbx(op, a, sbx);
        }
    }

    /// The code index the next instruction will land on.
    fn new_label(&self) -> usize {
        self.proto().code.len()
    }

    /// Distance from `label` to the current end of code.
    fn label_offset(&self, label: usize) -> i32 {
        (self.proto().code.len() - label) as i32
    }

    fn gen_register(&mut self) -> usize {
        let block = self.blocks.current_mut();
        let reg = block.register;
        block.register += 1;
        reg
    }

    fn enter_block(&mut self, context: BlockContext) {
        let start = self.proto().code.len();
        let register = self.blocks.current().register;
        self.blocks.push(context, start, register);
    }

    fn leave_block(&mut self) {
        let block = self.blocks.pop();
        if block.context == BlockContext::Loop {
            let end = self.proto().code.len() - 1;
            for index in block.pending_breaks {
                self.modify_asbx(index, Opcode::Jmp, 0, (end - index) as i32);
            }
        }
    }

    /// Interns `value` in the current prototype's constant pool.
    fn add_const(&mut self, value: Value, line: usize) -> Result<usize, CompileError> {
        let proto = self.protos.last_mut().expect("prototype stack");
        if let Some(index) = proto.consts.iter().position(|c| c.same_constant(&value)) {
            return Ok(index);
        }
        if proto.consts.len() >= MAX_CONSTS {
            return Err(self.error(line, "too many constants"));
        }
        let proto = self.protos.last_mut().expect("prototype stack");
        proto.consts.push(value);
        Ok(proto.consts.len() - 1)
    }

    /// Ensures an operand is a register: a biased constant index is loaded
    /// into `reg` first. Jump instructions can only test registers.
    fn to_register(&mut self, operand: usize, reg: usize, line: usize) -> usize {
        if operand >= OP_CONST_OFFSET {
            self.emit_abx(Opcode::LoadConst, reg, operand - OP_CONST_OFFSET, line);
            reg
        } else {
            operand
        }
    }

    /// Appends the terminal `RETURN 0 0` unless the last instruction already
    /// returns.
    fn return_guard(&mut self) {
        let needs = match self.proto().code.last() {
            Some(instr) => instr.op_index() != Opcode::Return as u32,
            None => true,
        };
        if needs {
            let line = self.last_line;
            self.emit_ab(Opcode::Return, 0, 0, line);
        }
    }

    fn error(&self, line: usize, message: impl Into<String>) -> CompileError {
        CompileError {
            file: self.filename.clone(),
            line,
            message: message.into(),
        }
    }

    fn id_name<'n>(&self, node: &'n Node) -> Result<&'n str, CompileError> {
        match node {
            Node::Id { name, .. } => Ok(name),
            _ => Err(self.error(node.line(), "expected identifier")),
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn compile_node(
        &mut self,
        node: &Node,
        info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        match node {
            Node::Nil { line } => self.compile_nil(*line, info),
            Node::Bool { value, line } => self.compile_value(Value::Bool(*value), *line, info),
            Node::Number { lexeme, line } => {
                let value = self.number_value(lexeme, *line)?;
                self.compile_value(value, *line, info)
            }
            Node::String { value, line } => {
                self.compile_value(Value::String(value.clone()), *line, info)
            }
            Node::Id { name, line } => self.compile_id(name, *line, info),
            Node::Array { elements, line } => self.compile_array(elements, *line, info),
            Node::Object { fields, line } => self.compile_object(fields, *line, info),
            Node::ObjectField { key, value, line } => {
                self.compile_object_field(key, value.as_deref(), *line, info)
            }
            Node::Function {
                name, args, body, ..
            } => self.compile_function(name.as_deref(), args, body, node.line(), info),
            Node::Selector { left, key, line } => self.compile_selector(left, key, *line, info),
            Node::Subscript { left, index, line } => {
                self.compile_subscript(left, index, *line, info)
            }
            Node::Call { callee, args, line } => self.compile_call(callee, args, *line, info),
            Node::Unary { op, right, line } => self.compile_unary(node, *op, right, *line, info),
            Node::Binary {
                op, left, right, ..
            } => self.compile_binary(node, *op, left, right, node.line(), info),
            Node::Ternary {
                cond,
                then,
                otherwise,
                line,
            } => self.compile_ternary(cond, then, otherwise, *line, info),
            Node::Postfix { op, left, line } => self.compile_postfix(*op, left, *line, info),
            Node::Declaration {
                is_const,
                left,
                right,
                line,
            } => self.compile_declaration(*is_const, left, right, *line),
            Node::Assignment {
                op,
                left,
                right,
                line,
            } => self.compile_assignment(*op, left, right, *line),
            Node::If {
                init,
                cond,
                body,
                otherwise,
                line,
            } => self.compile_if(init.as_deref(), cond, body, otherwise.as_deref(), *line),
            Node::For {
                init,
                cond,
                step,
                body,
                line,
            } => self.compile_for(init.as_deref(), cond, step, body, *line),
            Node::Branch { kind, line } => self.compile_branch(*kind, *line),
            Node::Return { values, line } => self.compile_return(values, *line),
            Node::Block { nodes, .. } => self.compile_block(nodes),

            // Surfaces the parser accepts but the compiler does not cover
            // yet; see the module documentation in `statements.rs`.
            Node::Slice { line, .. } => {
                Err(self.error(*line, "slice expressions are not implemented"))
            }
            Node::KwArg { line, .. } => {
                Err(self.error(*line, "keyword arguments are not implemented"))
            }
            Node::VarArg { line, .. } => {
                Err(self.error(*line, "variadic argument unpacking is not implemented"))
            }
            Node::ForIn { line, .. } => {
                Err(self.error(*line, "'for ... in' loops are not implemented"))
            }
        }
    }

    fn number_value(&self, lexeme: &str, line: usize) -> Result<Value, CompileError> {
        lexeme
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| self.error(line, format!("malformed number '{}'", lexeme)))
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn compile_nil(
        &mut self,
        line: usize,
        info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        match info {
            Some(expr) => {
                let rega = expr.rega;
                let regb = expr.regb.max(rega);
                self.emit_ab(Opcode::LoadNil, rega, regb, line);
                if expr.propagate {
                    expr.regb = rega;
                }
            }
            None => {
                let reg = self.gen_register();
                self.emit_ab(Opcode::LoadNil, reg, reg, line);
            }
        }
        Ok(())
    }

    /// Emission tail for expressions that folded after their destination
    /// register was already chosen: hand back a pool index when the caller
    /// propagates, load into `reg` otherwise.
    fn emit_folded(
        &mut self,
        value: Value,
        reg: usize,
        line: usize,
        info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        if let Some(expr) = info {
            if expr.propagate {
                expr.regb = OP_CONST_OFFSET + self.add_const(value, line)?;
                return Ok(());
            }
        }
        let index = self.add_const(value, line)?;
        self.emit_abx(Opcode::LoadConst, reg, index, line);
        Ok(())
    }

    /// Emission tail shared by literals, folded expressions and `const`
    /// references: hand back a pool index when the caller propagates, load
    /// into the destination register otherwise.
    fn compile_value(
        &mut self,
        value: Value,
        line: usize,
        info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        let reg = match info {
            Some(expr) if expr.propagate => {
                expr.regb = OP_CONST_OFFSET + self.add_const(value, line)?;
                return Ok(());
            }
            Some(expr) => expr.rega,
            None => self.gen_register(),
        };
        let index = self.add_const(value, line)?;
        self.emit_abx(Opcode::LoadConst, reg, index, line);
        Ok(())
    }

    fn compile_id(
        &mut self,
        name: &str,
        line: usize,
        mut info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        let reg = match info.as_deref() {
            Some(expr) => expr.rega,
            None => self.gen_register(),
        };

        match self.blocks.resolve(name) {
            Some(resolved) if resolved.is_const => {
                let value = resolved.value.unwrap_or(Value::Nil);
                self.emit_folded(value, reg, line, info)
            }
            Some(NameInfo {
                scope: ScopeKind::Local,
                reg: src,
                ..
            }) => {
                if let Some(expr) = info.as_deref_mut() {
                    if expr.propagate {
                        expr.regb = src;
                        return Ok(());
                    }
                }
                if reg != src {
                    self.emit_ab(Opcode::Move, reg, src, line);
                }
                Ok(())
            }
            resolved => {
                // Unresolved names are assumed global.
                let op = match resolved {
                    Some(NameInfo {
                        scope: ScopeKind::Ref,
                        ..
                    }) => Opcode::LoadRef,
                    _ => Opcode::LoadGlobal,
                };
                let index = self.add_const(Value::String(name.to_string()), line)?;
                self.emit_abx(op, reg, index, line);
                if let Some(expr) = info {
                    if expr.propagate {
                        expr.regb = reg;
                    }
                }
                Ok(())
            }
        }
    }

    fn compile_array(
        &mut self,
        elements: &[Node],
        line: usize,
        info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        let reg = match info.as_ref() {
            Some(expr) => expr.rega,
            None => self.gen_register(),
        };
        self.emit_ab(Opcode::Array, reg, 0, line);

        // Elements are appended in batches so the VM never sees more than
        // ARRAY_MAX_REGISTERS source registers per APPEND.
        let mut start = 0;
        while start < elements.len() {
            let batch = (elements.len() - start).min(ARRAY_MAX_REGISTERS);
            for i in 0..batch {
                let mut data = ExprInfo::at(reg + i + 1);
                self.compile_node(&elements[start + i], Some(&mut data))?;
            }
            self.emit_ab(Opcode::Append, reg, batch, line);
            start += batch;
        }

        if let Some(expr) = info {
            if expr.propagate {
                expr.regb = reg;
            }
        }
        Ok(())
    }

    fn compile_object(
        &mut self,
        fields: &[Node],
        line: usize,
        info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        let reg = match info.as_ref() {
            Some(expr) => expr.rega,
            None => self.gen_register(),
        };
        self.emit_ab(Opcode::Object, reg, 0, line);

        for field in fields {
            let mut data = ExprInfo::at(reg);
            self.compile_node(field, Some(&mut data))?;
        }

        if let Some(expr) = info {
            if expr.propagate {
                expr.regb = reg;
            }
        }
        Ok(())
    }

    fn compile_object_field(
        &mut self,
        key: &str,
        value: Option<&Node>,
        line: usize,
        info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        let Some(expr) = info else {
            return Err(self.error(line, "object field outside an object literal"));
        };
        let obj_reg = expr.rega;
        let key_index = OP_CONST_OFFSET + self.add_const(Value::String(key.to_string()), line)?;

        let mut value_data = ExprInfo::propagating(obj_reg + 1);
        match value {
            Some(value) => self.compile_node(value, Some(&mut value_data))?,
            // Shorthand field: `{ a }` is `{ a: a }`.
            None => self.compile_id(key, line, Some(&mut value_data))?,
        }

        self.emit_abc(Opcode::Set, obj_reg, key_index, value_data.regb, line);
        Ok(())
    }

    fn compile_function(
        &mut self,
        name: Option<&Node>,
        args: &[Node],
        body: &Node,
        line: usize,
        info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        let reg = match info.as_ref() {
            Some(expr) => expr.rega,
            None => self.gen_register(),
        };

        self.protos.push(FuncProto::new(&self.filename));
        self.blocks.push(BlockContext::Function, 0, 0);

        // Parameters become the first locals of the new frame. Keyword and
        // variadic parameters are not compiled yet and stay unregistered.
        for arg in args {
            if let Node::Id { name, .. } = arg {
                let param_reg = self.gen_register();
                self.blocks.declare(
                    name,
                    NameInfo {
                        is_const: false,
                        value: None,
                        reg: param_reg,
                        scope: ScopeKind::Local,
                    },
                );
            }
        }

        self.compile_node(body, None)?;
        self.return_guard();
        self.blocks.pop();

        let proto = self.protos.pop().expect("nested prototype");
        let parent = self.protos.last_mut().expect("prototype stack");
        parent.funcs.push(proto);
        let index = parent.funcs.len() - 1;

        self.emit_abx(Opcode::Func, reg, index, line);

        if let Some(name_node) = name {
            match name_node {
                // A fresh simple name becomes a local bound to the
                // function's own register; anything else is a plain
                // assignment.
                Node::Id { name, .. } if self.blocks.resolve(name).is_none() => {
                    self.blocks.declare(
                        name,
                        NameInfo {
                            is_const: false,
                            value: None,
                            reg,
                            scope: ScopeKind::Local,
                        },
                    );
                }
                _ => self.assignment_target(name_node, reg + 1, reg)?,
            }
        }

        if let Some(expr) = info {
            if expr.propagate {
                expr.regb = reg;
            }
        }
        Ok(())
    }

    fn compile_selector(
        &mut self,
        left: &Node,
        key: &str,
        line: usize,
        info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        let reg = match info.as_ref() {
            Some(expr) => expr.rega,
            None => self.gen_register(),
        };

        let mut obj_data = ExprInfo::propagating(reg + 1);
        self.compile_node(left, Some(&mut obj_data))?;
        let obj_reg = obj_data.regb;

        let key_index = OP_CONST_OFFSET + self.add_const(Value::String(key.to_string()), line)?;
        self.emit_abc(Opcode::Get, reg, obj_reg, key_index, line);

        if let Some(expr) = info {
            if expr.propagate {
                expr.regb = reg;
            }
        }
        Ok(())
    }

    fn compile_subscript(
        &mut self,
        left: &Node,
        index: &Node,
        line: usize,
        info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        if matches!(index, Node::Slice { .. }) {
            return Err(self.error(line, "slice expressions are not implemented"));
        }

        let reg = match info.as_ref() {
            Some(expr) => expr.rega,
            None => self.gen_register(),
        };

        let mut container_data = ExprInfo::propagating(reg + 1);
        self.compile_node(left, Some(&mut container_data))?;
        let container_reg = container_data.regb;

        // When the container materialized into the scratch register, the
        // index needs the next one so it cannot clobber it.
        let index_base = if container_reg == reg + 1 { reg + 2 } else { reg + 1 };
        let mut index_data = ExprInfo::propagating(index_base);
        self.compile_node(index, Some(&mut index_data))?;

        self.emit_abc(Opcode::Get, reg, container_reg, index_data.regb, line);

        if let Some(expr) = info {
            if expr.propagate {
                expr.regb = reg;
            }
        }
        Ok(())
    }

    fn compile_call(
        &mut self,
        callee: &Node,
        args: &[Node],
        line: usize,
        mut info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        let (start_reg, end_reg) = match info.as_deref() {
            // An inverted window is a plain single-result request.
            Some(expr) => (expr.rega, expr.regb.max(expr.rega)),
            None => {
                let reg = self.gen_register();
                (reg, reg)
            }
        };
        let result_count = end_reg - start_reg + 1;

        // The callee has to live at a known register, so no propagation.
        let mut callee_data = ExprInfo::at(start_reg);
        self.compile_node(callee, Some(&mut callee_data))?;

        for (i, arg) in args.iter().enumerate() {
            let mut data = ExprInfo::at(end_reg + i + 1);
            self.compile_node(arg, Some(&mut data))?;
        }

        self.emit_abc(Opcode::Call, start_reg, result_count, args.len(), line);

        if let Some(expr) = info.as_deref_mut() {
            if expr.propagate {
                expr.regb = start_reg;
            }
        }
        Ok(())
    }

    fn compile_unary(
        &mut self,
        node: &Node,
        op: TokenKind,
        right: &Node,
        line: usize,
        mut info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        let reg = match info.as_deref() {
            Some(expr) => expr.rega,
            None => self.gen_register(),
        };

        if let Some(value) = const_fold(&mut self.blocks, node) {
            return self.emit_folded(value, reg, line, info);
        }

        let opcode = match op {
            TokenKind::Minus => Opcode::Neg,
            TokenKind::Not | TokenKind::Bang => Opcode::Not,
            TokenKind::Tilde => Opcode::Cmpl,
            _ => return Err(self.error(line, format!("invalid unary operator {}", op))),
        };

        let mut data = ExprInfo::propagating(reg);
        self.compile_node(right, Some(&mut data))?;
        self.emit_abx(opcode, reg, data.regb, line);

        if let Some(expr) = info.as_deref_mut() {
            if expr.propagate {
                expr.regb = reg;
            }
        }
        Ok(())
    }

    fn compile_binary(
        &mut self,
        node: &Node,
        op: TokenKind,
        left: &Node,
        right: &Node,
        line: usize,
        mut info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        let reg = match info.as_deref() {
            Some(expr) => expr.rega,
            None => self.gen_register(),
        };

        if let Some(value) = const_fold(&mut self.blocks, node) {
            return self.emit_folded(value, reg, line, info);
        }

        if matches!(op, TokenKind::AmpAmp | TokenKind::PipePipe) {
            return self.compile_short_circuit(op, left, right, reg, line, info);
        }

        let opcode = match op {
            TokenKind::Plus => Opcode::Add,
            TokenKind::Minus => Opcode::Sub,
            TokenKind::Star => Opcode::Mul,
            TokenKind::Slash => Opcode::Div,
            TokenKind::StarStar => Opcode::Pow,
            TokenKind::LtLt => Opcode::Shl,
            TokenKind::GtGt => Opcode::Shr,
            TokenKind::Amp => Opcode::And,
            TokenKind::Pipe => Opcode::Or,
            TokenKind::Tilde => Opcode::Xor,
            // There are no greater-than opcodes; those comparisons swap
            // their operands below.
            TokenKind::Lt | TokenKind::Gt => Opcode::Lt,
            TokenKind::LtEq | TokenKind::GtEq => Opcode::Le,
            TokenKind::EqEq => Opcode::Eq,
            TokenKind::BangEq => Opcode::Ne,
            _ => return Err(self.error(line, format!("invalid binary operator {}", op))),
        };

        let mut data = ExprInfo {
            propagate: true,
            rega: reg,
            regb: 0,
        };
        self.compile_node(left, Some(&mut data))?;
        let left_operand = data.regb;

        // Temp register for the right expression.
        data.rega = reg + 1;
        self.compile_node(right, Some(&mut data))?;
        let right_operand = data.regb;

        if matches!(op, TokenKind::Gt | TokenKind::GtEq) {
            self.emit_abc(opcode, reg, right_operand, left_operand, line);
        } else {
            self.emit_abc(opcode, reg, left_operand, right_operand, line);
        }

        if let Some(expr) = info.as_deref_mut() {
            if expr.propagate {
                expr.regb = reg;
            }
        }
        Ok(())
    }

    fn compile_short_circuit(
        &mut self,
        op: TokenKind,
        left: &Node,
        right: &Node,
        reg: usize,
        line: usize,
        info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        let jmp_op = if op == TokenKind::AmpAmp {
            Opcode::JmpFalse
        } else {
            Opcode::JmpTrue
        };

        let mut data = ExprInfo::propagating(reg);
        self.compile_node(left, Some(&mut data))?;
        let left_reg = self.to_register(data.regb, reg, line);

        let jmp = self.emit_asbx(jmp_op, left_reg, 0, line);
        let size = self.proto().code.len();

        let mut data = ExprInfo::at(reg);
        self.compile_node(right, Some(&mut data))?;

        let distance = (self.proto().code.len() - size) as i32;
        self.modify_asbx(jmp, jmp_op, left_reg, distance);

        if let Some(expr) = info {
            if expr.propagate {
                expr.regb = reg;
            }
        }
        Ok(())
    }

    fn compile_ternary(
        &mut self,
        cond: &Node,
        then: &Node,
        otherwise: &Node,
        line: usize,
        info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        let reg = match info.as_ref() {
            Some(expr) => expr.rega,
            None => self.gen_register(),
        };

        // The condition lives in a scratch register above the destination.
        let mut cond_data = ExprInfo::propagating(reg + 1);
        self.compile_node(cond, Some(&mut cond_data))?;
        let cond_reg = self.to_register(cond_data.regb, reg + 1, line);

        let jmp = self.emit_asbx(Opcode::JmpFalse, cond_reg, 0, self.last_line);
        let then_label = self.new_label();

        let mut data = ExprInfo::at(reg);
        self.compile_node(then, Some(&mut data))?;
        let done = self.emit_asbx(Opcode::Jmp, 0, 0, self.last_line);

        self.modify_asbx(jmp, Opcode::JmpFalse, cond_reg, self.label_offset(then_label));
        let else_label = self.new_label();

        let mut data = ExprInfo::at(reg);
        self.compile_node(otherwise, Some(&mut data))?;
        self.modify_asbx(done, Opcode::Jmp, 0, self.label_offset(else_label));

        if let Some(expr) = info {
            if expr.propagate {
                expr.regb = reg;
            }
        }
        Ok(())
    }

    fn compile_postfix(
        &mut self,
        op: TokenKind,
        left: &Node,
        line: usize,
        info: Option<&mut ExprInfo>,
    ) -> Result<(), CompileError> {
        let (reg, in_expression) = match info.as_ref() {
            Some(expr) => (expr.rega, true),
            None => (self.gen_register(), false),
        };

        let opcode = match op {
            TokenKind::PlusPlus => Opcode::Add,
            TokenKind::MinusMinus => Opcode::Sub,
            _ => return Err(self.error(line, format!("invalid postfix operator {}", op))),
        };

        let mut data = ExprInfo::propagating(reg);
        self.compile_node(left, Some(&mut data))?;
        let place = data.regb;
        if place >= OP_CONST_OFFSET {
            let type_name = self.proto().consts[place - OP_CONST_OFFSET].type_name();
            return Err(self.error(
                line,
                format!("invalid operand to {}: cannot modify a {} constant", op, type_name),
            ));
        }

        let one = OP_CONST_OFFSET + self.add_const(Value::Number(1.0), line)?;

        // In rvalue position the pre-update value is preserved first.
        if in_expression && reg != place {
            self.emit_ab(Opcode::Move, reg, place, line);
        }
        self.emit_abc(opcode, place, place, one, line);

        if let Some(expr) = info {
            if expr.propagate {
                expr.regb = reg;
            }
        }
        Ok(())
    }

    // ========================================================================
    // Declarations and assignments
    // ========================================================================

    fn compile_declaration(
        &mut self,
        is_const: bool,
        left: &[Node],
        right: &[Node],
        line: usize,
    ) -> Result<(), CompileError> {
        if !is_const {
            return self.declare(left, right);
        }

        // Consts never hit a register: they exist only as folded values in
        // the scope table.
        for (i, id) in left.iter().enumerate() {
            let name = self.id_name(id)?;
            if self.blocks.declared_here(name) {
                return Err(self.error(id.line(), format!("cannot redeclare '{}'", name)));
            }
            if i >= right.len() {
                return Err(self.error(line, format!("const '{}' without initializer", name)));
            }
            let Some(value) = const_fold(&mut self.blocks, &right[i]) else {
                return Err(self.error(
                    line,
                    format!("const '{}' initializer is not a constant", name),
                ));
            };
            self.blocks.declare(
                name,
                NameInfo {
                    is_const: true,
                    value: Some(value),
                    reg: 0,
                    scope: ScopeKind::Local,
                },
            );
        }
        Ok(())
    }

    /// Declares local variables. Registers are allocated in sequence; a
    /// trailing call (or variadic unpack) receives every remaining register
    /// so it can fan its results out, and names left without a value are
    /// initialized with one `LOADNIL` over the rest of the range.
    fn declare(&mut self, names: &[Node], values: &[Node]) -> Result<(), CompileError> {
        if names.is_empty() {
            return Ok(());
        }
        let value_count = values.len();
        let (is_call, is_unpack) = match values.last() {
            Some(Node::Call { .. }) => (true, false),
            Some(Node::VarArg { .. }) => (false, true),
            _ => (false, false),
        };

        let mut start = self.blocks.current().register;
        let mut end = start + names.len() - 1;
        let first_line = names[0].line();

        for (i, id) in names.iter().enumerate() {
            let name = self.id_name(id)?;
            if self.blocks.declared_here(name) {
                return Err(self.error(id.line(), format!("cannot redeclare '{}'", name)));
            }
            let reg = self.gen_register();
            self.blocks.declare(
                name,
                NameInfo {
                    is_const: false,
                    value: None,
                    reg,
                    scope: ScopeKind::Local,
                },
            );

            let mut data = ExprInfo::at(reg);
            if i + 1 == value_count && (is_call || is_unpack) {
                // The last producer fans out across all remaining
                // registers; reserve them first.
                for rest in &names[i + 1..] {
                    let rest_name = self.id_name(rest)?;
                    if self.blocks.declared_here(rest_name) {
                        return Err(
                            self.error(rest.line(), format!("cannot redeclare '{}'", rest_name))
                        );
                    }
                    end = self.gen_register();
                    self.blocks.declare(
                        rest_name,
                        NameInfo {
                            is_const: false,
                            value: None,
                            reg: end,
                            scope: ScopeKind::Local,
                        },
                    );
                }
                data.regb = end;
                start = end + 1;
                self.compile_node(&values[i], Some(&mut data))?;
                break;
            }
            if i < value_count {
                self.compile_node(&values[i], Some(&mut data))?;
                start = reg + 1;
            }
        }

        if end >= start {
            // Variables without an initializer are set to nil.
            self.emit_ab(Opcode::LoadNil, start, end, first_line);
        }
        Ok(())
    }

    fn compile_assignment(
        &mut self,
        op: TokenKind,
        left: &[Node],
        right: &[Node],
        line: usize,
    ) -> Result<(), CompileError> {
        // ':=' is a short variable declaration. The parser already enforced
        // an identifier list, but a clear error beats a bad cast.
        if op == TokenKind::ColonEq {
            for target in left {
                if !target.is_id() {
                    return Err(self.error(line, "non-identifier at left side of ':='"));
                }
            }
            return self.declare(left, right);
        }

        // Compound operators reduce to `l = l op r`, pairwise.
        if let Some(binary_op) = op.compound_binary() {
            if left.len() != right.len() {
                return Err(self.error(line, "unbalanced compound assignment"));
            }
            let desugared: Vec<Node> = left
                .iter()
                .zip(right)
                .map(|(l, r)| Node::Binary {
                    op: binary_op,
                    left: Box::new(l.clone()),
                    right: Box::new(r.clone()),
                    line: r.line(),
                })
                .collect();
            return self.compile_assignment(TokenKind::Eq, left, &desugared, line);
        }

        // A single resolved local takes its value directly, skipping the
        // temp window and its MOVE.
        if left.len() == 1 && right.len() == 1 {
            if let Node::Id { name, .. } = &left[0] {
                if let Some(resolved) = self.blocks.resolve(name) {
                    if resolved.is_const {
                        return Err(
                            self.error(line, format!("cannot assign to constant '{}'", name))
                        );
                    }
                    if resolved.scope == ScopeKind::Local {
                        let mut data = ExprInfo::at(resolved.reg);
                        return self.compile_node(&right[0], Some(&mut data));
                    }
                }
            }
        }

        let var_count = left.len();
        let value_count = right.len();
        let (is_call, is_unpack) = match right.last() {
            Some(Node::Call { .. }) => (true, false),
            Some(Node::VarArg { .. }) => (false, true),
            _ => (false, false),
        };

        // Evaluate every right-hand expression into a scratch window above
        // the allocated registers first.
        let start = self.blocks.current().register;
        let mut current = start;
        let end = start + var_count - 1;

        for i in 0..var_count {
            let reg = start + i;
            let mut data = ExprInfo::at(reg);
            if i + 1 == value_count && (is_call || is_unpack) {
                data.regb = end;
                current = end + 1;
                self.compile_node(&right[i], Some(&mut data))?;
                break;
            }
            if i < value_count {
                self.compile_node(&right[i], Some(&mut data))?;
                current = reg + 1;
            }
        }

        // Then store each evaluated value into its target; variables
        // without a corresponding value stay untouched.
        for (i, target) in left.iter().enumerate() {
            let value_reg = start + i;
            if value_reg >= current {
                break;
            }
            self.assignment_target(target, current + 1, value_reg)?;
        }
        Ok(())
    }

    /// Stores `value_reg` into an assignment target. `scratch_reg` is a free
    /// register for evaluating container expressions.
    fn assignment_target(
        &mut self,
        target: &Node,
        scratch_reg: usize,
        value_reg: usize,
    ) -> Result<(), CompileError> {
        match target {
            Node::Id { name, line } => {
                match self.blocks.resolve(name) {
                    Some(resolved) if resolved.is_const => {
                        Err(self.error(*line, format!("cannot assign to constant '{}'", name)))
                    }
                    Some(NameInfo {
                        scope: ScopeKind::Local,
                        reg,
                        ..
                    }) => {
                        if reg != value_reg {
                            self.emit_ab(Opcode::Move, reg, value_reg, *line);
                        }
                        Ok(())
                    }
                    resolved => {
                        let op = match resolved {
                            Some(NameInfo {
                                scope: ScopeKind::Ref,
                                ..
                            }) => Opcode::SetRef,
                            _ => Opcode::SetGlobal,
                        };
                        let index =
                            self.add_const(Value::String(name.to_string()), *line)?;
                        self.emit_abx(op, value_reg, index, *line);
                        Ok(())
                    }
                }
            }
            Node::Subscript { left, index, line } => {
                let mut container_data = ExprInfo::propagating(scratch_reg);
                self.compile_node(left, Some(&mut container_data))?;
                let container_reg = container_data.regb;

                let index_base = if container_reg == scratch_reg {
                    scratch_reg + 1
                } else {
                    scratch_reg
                };
                let mut index_data = ExprInfo::propagating(index_base);
                self.compile_node(index, Some(&mut index_data))?;

                self.emit_abc(Opcode::Set, container_reg, index_data.regb, value_reg, *line);
                Ok(())
            }
            Node::Selector { left, key, line } => {
                let mut obj_data = ExprInfo::propagating(scratch_reg);
                self.compile_node(left, Some(&mut obj_data))?;
                let obj_reg = obj_data.regb;

                let key_index =
                    OP_CONST_OFFSET + self.add_const(Value::String(key.to_string()), *line)?;
                self.emit_abc(Opcode::Set, obj_reg, key_index, value_reg, *line);
                Ok(())
            }
            _ => Err(self.error(target.line(), "cannot assign to this expression")),
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn compile_if(
        &mut self,
        init: Option<&Node>,
        cond: &Node,
        body: &Node,
        otherwise: Option<&Node>,
        line: usize,
    ) -> Result<(), CompileError> {
        self.enter_block(BlockContext::Branch);

        if let Some(init) = init {
            self.compile_node(init, None)?;
        }

        // The condition gets its own register; body temporaries allocate
        // above it.
        let cond_scratch = self.gen_register();
        let mut cond_data = ExprInfo::propagating(cond_scratch);
        self.compile_node(cond, Some(&mut cond_data))?;
        let cond_reg = self.to_register(cond_data.regb, cond_scratch, line);

        let jmp = self.emit_asbx(Opcode::JmpFalse, cond_reg, 0, self.last_line);
        let then_label = self.new_label();

        self.compile_node(body, None)?;

        match otherwise {
            Some(otherwise) => {
                let done = self.emit_asbx(Opcode::Jmp, 0, 0, self.last_line);
                self.modify_asbx(jmp, Opcode::JmpFalse, cond_reg, self.label_offset(then_label));
                let else_label = self.new_label();
                self.compile_node(otherwise, None)?;
                self.modify_asbx(done, Opcode::Jmp, 0, self.label_offset(else_label));
            }
            None => {
                self.modify_asbx(jmp, Opcode::JmpFalse, cond_reg, self.label_offset(then_label));
            }
        }

        self.leave_block();
        Ok(())
    }

    fn compile_for(
        &mut self,
        init: Option<&Node>,
        cond: &Node,
        step: &Node,
        body: &Node,
        line: usize,
    ) -> Result<(), CompileError> {
        self.enter_block(BlockContext::Loop);

        if let Some(init) = init {
            self.compile_node(init, None)?;
        }

        let reg = self.blocks.current().register;
        let cond_label = self.new_label();
        // 'continue' re-tests the condition rather than re-running the
        // initializer.
        self.blocks.current_mut().start = cond_label;

        let mut cond_data = ExprInfo::propagating(reg);
        self.compile_node(cond, Some(&mut cond_data))?;
        let cond_reg = self.to_register(cond_data.regb, reg, line);

        let jmp = self.emit_asbx(Opcode::JmpFalse, cond_reg, 0, self.last_line);
        let body_label = self.new_label();

        self.compile_node(body, None)?;

        let step_keeps_register = self.binds_function_name(step);
        self.compile_node(step, None)?;
        if !step.is_stmt() && !step_keeps_register {
            // Discard the register consumed by an expression step.
            self.blocks.current_mut().register -= 1;
        }

        let back = -self.label_offset(cond_label) - 1;
        self.emit_asbx(Opcode::Jmp, 0, back, self.last_line);
        self.modify_asbx(jmp, Opcode::JmpFalse, cond_reg, self.label_offset(body_label));

        self.leave_block();
        Ok(())
    }

    fn compile_branch(&mut self, kind: TokenKind, line: usize) -> Result<(), CompileError> {
        let keyword = if kind == TokenKind::Break {
            "break"
        } else {
            "continue"
        };
        let Some(loop_index) = self.blocks.nearest_loop() else {
            return Err(self.error(line, format!("{} outside loop", keyword)));
        };

        match kind {
            TokenKind::Continue => {
                let index = self.proto().code.len();
                let start = self.blocks.get_mut(loop_index).start;
                self.emit_asbx(Opcode::Jmp, 0, -((index - start) as i32) - 1, line);
            }
            TokenKind::Break => {
                let instr = self.emit_asbx(Opcode::Jmp, 0, 0, line);
                self.blocks.get_mut(loop_index).pending_breaks.push(instr);
            }
            _ => return Err(self.error(line, "invalid branch statement")),
        }
        Ok(())
    }

    fn compile_return(&mut self, values: &[Node], line: usize) -> Result<(), CompileError> {
        let start = self.blocks.current().register;
        for value in values {
            let reg = self.gen_register();
            let mut data = ExprInfo::at(reg);
            self.compile_node(value, Some(&mut data))?;
        }
        self.emit_ab(Opcode::Return, start, values.len(), line);
        Ok(())
    }

    fn compile_block(&mut self, nodes: &[Node]) -> Result<(), CompileError> {
        for stmt in nodes {
            let keeps_register = self.binds_function_name(stmt);
            self.compile_node(stmt, None)?;
            if !stmt.is_stmt() && !keeps_register {
                // An expression in statement position; drop its temporary.
                self.blocks.current_mut().register -= 1;
            }
        }
        Ok(())
    }

    /// True for a named function statement about to bind a fresh local:
    /// the binding lives in the function's own register, which must stay
    /// allocated like a declaration's instead of being discarded as an
    /// expression temporary. Mirrors the binding condition in
    /// [`Self::compile_function`], checked before the node compiles.
    fn binds_function_name(&mut self, stmt: &Node) -> bool {
        match stmt {
            Node::Function {
                name: Some(name), ..
            } => match name.as_ref() {
                Node::Id { name, .. } => self.blocks.resolve(name).is_none(),
                _ => false,
            },
            _ => false,
        }
    }
}
