//! Core virtual machine implementation.
//!
//! The VM executes bytecode against four address spaces: the operand stack,
//! the call-frame stack, the typed heap and the string heap. Execution is a
//! sequential fetch-decode-execute loop; it is `Running` until the stop flag
//! is raised or the reader hits the end of the bytecode (`Stopped`), or
//! until a handler faults or the `err` instruction populates the error slot
//! (`Faulted`). The offset of the instruction being executed is always
//! available as [`VM::last_instruction`] so faults can be mapped back to
//! source through the source map.

use std::io::{BufRead, BufReader, Read, Write};

use crate::bytecode::Reader;
use crate::errors::VMError;
use crate::isa::Instruction;
use crate::log;
use crate::value::Value;

mod heap;
mod registers;
mod stack;

pub use heap::{Heap, StringHeap};
pub use registers::Registers;
pub use stack::{CallFrame, Stack};

/// Upper bound on a single `read` input line, in bytes.
const MAX_READ_LINE: u64 = 1024 * 1024;

/// Bytecode virtual machine.
pub struct VM {
    /// Bytecode stream; its cursor is the code pointer.
    reader: Reader,
    /// Operand stack; its length is the stack pointer.
    stack: Stack,
    /// Call frames pushed by `call` and consumed by `return`.
    call_stack: Vec<CallFrame>,
    /// Typed heap of value cells.
    heap: Heap,
    /// Byte heap for strings.
    strings: StringHeap,
    registers: Registers,
    /// Offset of the opcode currently (or last) executed.
    last_instruction: usize,
    input: Box<dyn BufRead>,
    output: Box<dyn Write>,
}

impl VM {
    /// Creates a VM over the given bytecode, wired to standard I/O.
    pub fn new(reader: Reader) -> Self {
        Self::with_io(
            reader,
            Box::new(BufReader::new(std::io::stdin())),
            Box::new(std::io::stdout()),
        )
    }

    /// Creates a VM with injected input and output streams.
    pub fn with_io(reader: Reader, input: Box<dyn BufRead>, output: Box<dyn Write>) -> Self {
        Self {
            reader,
            stack: Stack::new(),
            call_stack: Vec::new(),
            heap: Heap::new(),
            strings: StringHeap::new(),
            registers: Registers::new(),
            last_instruction: 0,
            input,
            output,
        }
    }

    /// Offset of the opcode that was executing when the run ended.
    pub fn last_instruction(&self) -> usize {
        self.last_instruction
    }

    /// The user error message raised by `err`, if any.
    pub fn err_message(&self) -> Option<&str> {
        self.registers.err.as_deref()
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    /// The code pointer: the bytecode reader's cursor.
    pub fn code_pointer(&self) -> usize {
        self.reader.cursor()
    }

    /// Moves the code pointer.
    pub fn set_code_pointer(&mut self, position: usize) {
        self.reader.set_cursor(position);
    }

    /// The stack pointer: the operand stack's length.
    pub fn stack_pointer(&self) -> usize {
        self.stack.len()
    }

    /// Forces the stack pointer by truncating or zero-extending the operand
    /// stack. Bytecode never does this; the foreign register surface may.
    pub fn set_stack_pointer(&mut self, length: usize) {
        self.stack.resize(length);
    }

    /// Length of the underlying bytecode.
    pub fn code_len(&self) -> usize {
        self.reader.len()
    }

    /// Operand stack access for the embedding surface.
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub fn stack_load(&self, index: usize) -> Result<Value, VMError> {
        self.stack.load(index)
    }

    pub fn stack_store(&mut self, index: usize, value: Value) -> Result<Value, VMError> {
        self.stack.store(index, value)
    }

    pub fn stack_push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn stack_pop(&mut self) -> Result<Value, VMError> {
        self.stack.pop()
    }

    /// Runs the fetch-decode-execute loop until the program stops, the
    /// bytecode ends, or a fault terminates the run.
    pub fn execute(&mut self) -> Result<(), VMError> {
        while !self.reader.end_of_file() {
            self.last_instruction = self.reader.cursor();
            let opcode = self.reader.read_u8()?;
            let instruction =
                Instruction::try_from(opcode).map_err(|_| VMError::InvalidInstruction {
                    opcode,
                    offset: self.last_instruction,
                })?;

            if log::enabled(log::Level::Debug) {
                log::debug(&format!(
                    "{:>6}  {}",
                    self.last_instruction,
                    instruction.mnemonic()
                ));
            }

            self.exec(instruction)?;

            if let Some(message) = &self.registers.err {
                return Err(VMError::RuntimeError {
                    message: message.clone(),
                });
            }
            if self.registers.stop {
                break;
            }
        }
        Ok(())
    }

    /// Decodes the operand (if any) and executes a single instruction.
    fn exec(&mut self, instruction: Instruction) -> Result<(), VMError> {
        match instruction {
            Instruction::Concat => self.op_concat(),
            Instruction::Jump => {
                let address = self.reader.read_usize()?;
                self.op_jump(address)
            }
            Instruction::Jz => {
                let address = self.reader.read_usize()?;
                self.op_jz(address)
            }
            Instruction::PushA => {
                let address = self.reader.read_usize()?;
                self.op_pusha(address)
            }
            Instruction::Call => self.op_call(),
            Instruction::Return => self.op_return(),
            Instruction::Start => self.op_start(),
            Instruction::Nop | Instruction::Debug => Ok(()),
            Instruction::Stop => self.op_stop(),
            Instruction::Err => {
                let message = self.reader.read_string()?;
                self.op_err(message)
            }
            Instruction::Atoi => self.op_atoi(),
            Instruction::Atof => self.op_atof(),
            Instruction::Itof => self.op_itof(),
            Instruction::Ftoi => self.op_ftoi(),
            Instruction::Stri => self.op_stri(),
            Instruction::Strf => self.op_strf(),
            Instruction::Dup => {
                let count = self.reader.read_i32()?;
                self.op_dup(count)
            }
            Instruction::DupN => self.op_dupn(),
            Instruction::FAdd => self.float_binary("fadd", |a, b| a + b),
            Instruction::FSub => self.float_binary("fsub", |a, b| a - b),
            Instruction::FMul => self.float_binary("fmul", |a, b| a * b),
            Instruction::FDiv => self.float_binary("fdiv", |a, b| a / b),
            Instruction::FInf => self.float_compare("finf", |a, b| a < b),
            Instruction::FInfEq => self.float_compare("finfeq", |a, b| a <= b),
            Instruction::FSup => self.float_compare("fsup", |a, b| a > b),
            Instruction::FSupEq => self.float_compare("fsupeq", |a, b| a >= b),
            Instruction::FCos => self.float_unary("fcos", f64::cos),
            Instruction::FSin => self.float_unary("fsin", f64::sin),
            Instruction::Alloc => {
                let count = self.reader.read_usize()?;
                self.op_alloc(count)
            }
            Instruction::AllocN => self.op_allocn(),
            Instruction::Free => self.op_free(),
            Instruction::Equal => self.op_equal(),
            Instruction::Add => self.integer_binary("add", |a, b| Ok(a.wrapping_add(b))),
            Instruction::Sub => self.integer_binary("sub", |a, b| Ok(a.wrapping_sub(b))),
            Instruction::Mul => self.integer_binary("mul", |a, b| Ok(a.wrapping_mul(b))),
            Instruction::Div => self.integer_binary("div", floor_div),
            Instruction::Mod => self.integer_binary("mod", floor_mod),
            Instruction::Inf => self.integer_compare("inf", |a, b| a < b),
            Instruction::InfEq => self.integer_compare("infeq", |a, b| a <= b),
            Instruction::Sup => self.integer_compare("sup", |a, b| a > b),
            Instruction::SupEq => self.integer_compare("supeq", |a, b| a >= b),
            Instruction::Not => self.op_not(),
            Instruction::Load => {
                let offset = self.reader.read_i32()?;
                self.op_load(offset)
            }
            Instruction::LoadN => self.op_loadn(),
            Instruction::Swap => self.op_swap(),
            Instruction::WriteI => self.op_write_integer("writei", false),
            Instruction::WritelnI => self.op_write_integer("writelni", true),
            Instruction::WriteF => self.op_write_float("writef", false),
            Instruction::WritelnF => self.op_write_float("writelnf", true),
            Instruction::WriteS => self.op_write_string("writes", false),
            Instruction::WritelnS => self.op_write_string("writelns", true),
            Instruction::Read => self.op_read(),
            Instruction::Padd => self.op_padd(),
            Instruction::Pop => {
                let count = self.reader.read_i32()?;
                self.op_pop(count)
            }
            Instruction::PopN => self.op_popn(),
            Instruction::PushI => {
                let value = self.reader.read_i32()?;
                self.op_pushi(value)
            }
            Instruction::PushN => {
                let count = self.reader.read_i32()?;
                self.op_pushn(count)
            }
            Instruction::PushF => {
                let value = self.reader.read_f64()?;
                self.op_pushf(value)
            }
            Instruction::PushS => {
                let bytes = self.reader.read_string()?;
                self.op_pushs(bytes)
            }
            Instruction::PushG => {
                let offset = self.reader.read_i32()?;
                self.op_pushg(offset)
            }
            Instruction::PushL => {
                let offset = self.reader.read_i32()?;
                self.op_pushl(offset)
            }
            Instruction::PushSP => self.op_pushsp(),
            Instruction::PushFP => self.op_pushfp(),
            Instruction::PushGP => self.op_pushgp(),
            Instruction::Store => {
                let offset = self.reader.read_i32()?;
                self.op_store(offset)
            }
            Instruction::StoreL => {
                let offset = self.reader.read_i32()?;
                self.op_storel(offset)
            }
            Instruction::StoreG => {
                let offset = self.reader.read_i32()?;
                self.op_storeg(offset)
            }
            Instruction::StoreN => self.op_storen(),
        }
    }

    // ==================== Control flow ====================

    fn op_jump(&mut self, address: usize) -> Result<(), VMError> {
        self.reader.set_cursor(address);
        Ok(())
    }

    fn op_jz(&mut self, address: usize) -> Result<(), VMError> {
        if self.stack.pop_integer("jz")? == 0 {
            self.reader.set_cursor(address);
        }
        Ok(())
    }

    fn op_pusha(&mut self, address: usize) -> Result<(), VMError> {
        self.stack.push(Value::AddressCode(address));
        Ok(())
    }

    fn op_call(&mut self) -> Result<(), VMError> {
        let target = self.stack.pop_code_address("call")?;
        self.call_stack.push(CallFrame {
            frame_pointer: self.registers.frame_pointer,
            code_pointer: self.reader.cursor(),
        });
        self.registers.frame_pointer = self.stack.len();
        self.reader.set_cursor(target);
        Ok(())
    }

    /// Tears down the returning frame, keeping its topmost value (if any)
    /// as the return value, and resumes at the caller.
    fn op_return(&mut self) -> Result<(), VMError> {
        let frame = self.call_stack.pop().ok_or(VMError::InvalidOperand {
            instruction: "return",
            operand: "empty call stack".to_string(),
        })?;

        let result = if self.stack.len() > self.registers.frame_pointer {
            Some(self.stack.pop()?)
        } else {
            None
        };
        while self.stack.len() > self.registers.frame_pointer {
            self.stack.pop()?;
        }

        self.registers.frame_pointer = frame.frame_pointer;
        self.reader.set_cursor(frame.code_pointer);
        if let Some(value) = result {
            self.stack.push(value);
        }
        Ok(())
    }

    fn op_start(&mut self) -> Result<(), VMError> {
        self.registers.global_pointer = self.stack.len();
        self.registers.frame_pointer = self.stack.len();
        Ok(())
    }

    fn op_stop(&mut self) -> Result<(), VMError> {
        self.registers.stop = true;
        Ok(())
    }

    fn op_err(&mut self, message: Vec<u8>) -> Result<(), VMError> {
        self.registers.err = Some(String::from_utf8_lossy(&message).into_owned());
        Ok(())
    }

    // ==================== Conversions ====================

    fn op_atoi(&mut self) -> Result<(), VMError> {
        let address = self.stack.pop_string_address("atoi")?;
        let bytes = self.strings.load_all(address)?;
        let text = std::str::from_utf8(bytes).map_err(|_| VMError::InvalidNumber {
            literal: String::from_utf8_lossy(bytes).into_owned(),
        })?;
        let value = text.parse::<i32>().map_err(|_| VMError::InvalidNumber {
            literal: text.to_string(),
        })?;
        self.stack.push(Value::Integer(value));
        Ok(())
    }

    fn op_atof(&mut self) -> Result<(), VMError> {
        let address = self.stack.pop_string_address("atof")?;
        let bytes = self.strings.load_all(address)?;
        let text = std::str::from_utf8(bytes).map_err(|_| VMError::InvalidNumber {
            literal: String::from_utf8_lossy(bytes).into_owned(),
        })?;
        let value = text.parse::<f64>().map_err(|_| VMError::InvalidNumber {
            literal: text.to_string(),
        })?;
        self.stack.push(Value::Float(value));
        Ok(())
    }

    fn op_itof(&mut self) -> Result<(), VMError> {
        let value = self.stack.pop_integer("itof")?;
        self.stack.push(Value::Float(value as f64));
        Ok(())
    }

    fn op_ftoi(&mut self) -> Result<(), VMError> {
        let value = self.stack.pop_float("ftoi")?;
        self.stack.push(Value::Integer(value as i32));
        Ok(())
    }

    fn op_stri(&mut self) -> Result<(), VMError> {
        let value = self.stack.pop_integer("stri")?;
        let base = self.strings.alloc(value.to_string().as_bytes());
        self.stack.push(Value::AddressString(base));
        Ok(())
    }

    fn op_strf(&mut self) -> Result<(), VMError> {
        let value = self.stack.pop_float("strf")?;
        let base = self.strings.alloc(value.to_string().as_bytes());
        self.stack.push(Value::AddressString(base));
        Ok(())
    }

    // ==================== Stack manipulation ====================

    fn dup_top(&mut self, instruction: &'static str, count: i32) -> Result<(), VMError> {
        let count = non_negative(instruction, count)?;
        let len = self.stack.len();
        if count > len {
            return Err(VMError::OutOfBounds { index: count, len });
        }
        for index in len - count..len {
            let value = self.stack.load(index)?;
            self.stack.push(value);
        }
        Ok(())
    }

    fn op_dup(&mut self, count: i32) -> Result<(), VMError> {
        self.dup_top("dup", count)
    }

    fn op_dupn(&mut self) -> Result<(), VMError> {
        let count = self.stack.pop_integer("dupn")?;
        self.dup_top("dupn", count)
    }

    fn discard_top(&mut self, instruction: &'static str, count: i32) -> Result<(), VMError> {
        let count = non_negative(instruction, count)?;
        for _ in 0..count {
            self.stack.pop()?;
        }
        Ok(())
    }

    fn op_pop(&mut self, count: i32) -> Result<(), VMError> {
        self.discard_top("pop", count)
    }

    fn op_popn(&mut self) -> Result<(), VMError> {
        let count = self.stack.pop_integer("popn")?;
        self.discard_top("popn", count)
    }

    fn op_swap(&mut self) -> Result<(), VMError> {
        let top = self.stack.pop()?;
        let below = self.stack.pop()?;
        self.stack.push(top);
        self.stack.push(below);
        Ok(())
    }

    // ==================== Pushes ====================

    fn op_pushi(&mut self, value: i32) -> Result<(), VMError> {
        self.stack.push(Value::Integer(value));
        Ok(())
    }

    fn op_pushn(&mut self, count: i32) -> Result<(), VMError> {
        let count = non_negative("pushn", count)?;
        for _ in 0..count {
            self.stack.push(Value::Integer(0));
        }
        Ok(())
    }

    fn op_pushf(&mut self, value: f64) -> Result<(), VMError> {
        self.stack.push(Value::Float(value));
        Ok(())
    }

    fn op_pushs(&mut self, bytes: Vec<u8>) -> Result<(), VMError> {
        let base = self.strings.adopt(bytes);
        self.stack.push(Value::AddressString(base));
        Ok(())
    }

    fn op_pushg(&mut self, offset: i32) -> Result<(), VMError> {
        let index = Value::displace(self.registers.global_pointer, offset);
        let value = self.stack.load(index)?;
        self.stack.push(value);
        Ok(())
    }

    fn op_pushl(&mut self, offset: i32) -> Result<(), VMError> {
        let index = Value::displace(self.registers.frame_pointer, offset);
        let value = self.stack.load(index)?;
        self.stack.push(value);
        Ok(())
    }

    fn op_pushsp(&mut self) -> Result<(), VMError> {
        self.stack.push(Value::AddressStack(self.stack.len()));
        Ok(())
    }

    fn op_pushfp(&mut self) -> Result<(), VMError> {
        self.stack
            .push(Value::AddressStack(self.registers.frame_pointer));
        Ok(())
    }

    fn op_pushgp(&mut self) -> Result<(), VMError> {
        self.stack
            .push(Value::AddressStack(self.registers.global_pointer));
        Ok(())
    }

    // ==================== Memory ====================

    fn load_via(
        &self,
        instruction: &'static str,
        address: Value,
        offset: i32,
    ) -> Result<Value, VMError> {
        match address {
            Value::AddressHeap(base) => self.heap.load(Value::displace(base, offset)),
            Value::AddressStack(base) => self.stack.load(Value::displace(base, offset)),
            other => Err(VMError::InvalidOperand {
                instruction,
                operand: other.kind_name().to_string(),
            }),
        }
    }

    fn store_via(
        &mut self,
        instruction: &'static str,
        address: Value,
        offset: i32,
        value: Value,
    ) -> Result<(), VMError> {
        match address {
            Value::AddressHeap(base) => self.heap.store(Value::displace(base, offset), value),
            Value::AddressStack(base) => self
                .stack
                .store(Value::displace(base, offset), value)
                .map(|_| ()),
            other => Err(VMError::InvalidOperand {
                instruction,
                operand: other.kind_name().to_string(),
            }),
        }
    }

    fn op_load(&mut self, offset: i32) -> Result<(), VMError> {
        let address = self.stack.pop_address("load")?;
        let value = self.load_via("load", address, offset)?;
        self.stack.push(value);
        Ok(())
    }

    fn op_loadn(&mut self) -> Result<(), VMError> {
        let offset = self.stack.pop_integer("loadn")?;
        let address = self.stack.pop_address("loadn")?;
        let value = self.load_via("loadn", address, offset)?;
        self.stack.push(value);
        Ok(())
    }

    fn op_store(&mut self, offset: i32) -> Result<(), VMError> {
        let value = self.stack.pop()?;
        let address = self.stack.pop_address("store")?;
        self.store_via("store", address, offset, value)
    }

    fn op_storel(&mut self, offset: i32) -> Result<(), VMError> {
        let value = self.stack.pop()?;
        let index = Value::displace(self.registers.frame_pointer, offset);
        self.stack.store(index, value)?;
        Ok(())
    }

    fn op_storeg(&mut self, offset: i32) -> Result<(), VMError> {
        let value = self.stack.pop()?;
        let index = Value::displace(self.registers.global_pointer, offset);
        self.stack.store(index, value)?;
        Ok(())
    }

    fn op_storen(&mut self) -> Result<(), VMError> {
        let value = self.stack.pop()?;
        let offset = self.stack.pop_integer("storen")?;
        let address = self.stack.pop_address("storen")?;
        self.store_via("storen", address, offset, value)
    }

    fn op_padd(&mut self) -> Result<(), VMError> {
        let offset = self.stack.pop_integer("padd")?;
        let address = self.stack.pop_address("padd")?;
        let displaced = match address {
            Value::AddressHeap(base) => Value::AddressHeap(Value::displace(base, offset)),
            Value::AddressString(base) => Value::AddressString(Value::displace(base, offset)),
            Value::AddressCode(base) => Value::AddressCode(Value::displace(base, offset)),
            Value::AddressStack(base) => Value::AddressStack(Value::displace(base, offset)),
            other => {
                return Err(VMError::TypeMismatch {
                    instruction: "padd",
                    expected: "an address",
                    actual: other.kind_name(),
                });
            }
        };
        self.stack.push(displaced);
        Ok(())
    }

    fn op_alloc(&mut self, count: usize) -> Result<(), VMError> {
        if count == 0 {
            return Err(VMError::InvalidOperand {
                instruction: "alloc",
                operand: "0".to_string(),
            });
        }
        let base = self.heap.alloc(count);
        self.stack.push(Value::AddressHeap(base));
        Ok(())
    }

    fn op_allocn(&mut self) -> Result<(), VMError> {
        let count = self.stack.pop_integer("allocn")?;
        if count <= 0 {
            return Err(VMError::InvalidOperand {
                instruction: "allocn",
                operand: count.to_string(),
            });
        }
        let base = self.heap.alloc(count as usize);
        self.stack.push(Value::AddressHeap(base));
        Ok(())
    }

    fn op_free(&mut self) -> Result<(), VMError> {
        let address = self.stack.pop_heap_address("free")?;
        self.heap.free(address);
        Ok(())
    }

    // ==================== Strings ====================

    fn op_concat(&mut self) -> Result<(), VMError> {
        let second = self.stack.pop_string_address("concat")?;
        let first = self.stack.pop_string_address("concat")?;
        let mut joined = self.strings.load_all(first)?.to_vec();
        joined.extend_from_slice(self.strings.load_all(second)?);
        let base = self.strings.adopt(joined);
        self.stack.push(Value::AddressString(base));
        Ok(())
    }

    fn op_equal(&mut self) -> Result<(), VMError> {
        let second = self.stack.pop()?;
        let first = self.stack.pop()?;
        let equal = match (first, second) {
            (Value::AddressString(a), Value::AddressString(b)) => {
                self.strings.load_all(a)? == self.strings.load_all(b)?
            }
            (a, b) => a == b,
        };
        self.stack.push(Value::Integer(equal as i32));
        Ok(())
    }

    // ==================== Arithmetic ====================

    fn integer_binary(
        &mut self,
        instruction: &'static str,
        op: fn(i32, i32) -> Result<i32, VMError>,
    ) -> Result<(), VMError> {
        let second = self.stack.pop_integer(instruction)?;
        let first = self.stack.pop_integer(instruction)?;
        self.stack.push(Value::Integer(op(first, second)?));
        Ok(())
    }

    fn integer_compare(
        &mut self,
        instruction: &'static str,
        op: fn(i32, i32) -> bool,
    ) -> Result<(), VMError> {
        let second = self.stack.pop_integer(instruction)?;
        let first = self.stack.pop_integer(instruction)?;
        self.stack.push(Value::Integer(op(first, second) as i32));
        Ok(())
    }

    fn float_binary(
        &mut self,
        instruction: &'static str,
        op: fn(f64, f64) -> f64,
    ) -> Result<(), VMError> {
        let second = self.stack.pop_float(instruction)?;
        let first = self.stack.pop_float(instruction)?;
        self.stack.push(Value::Float(op(first, second)));
        Ok(())
    }

    fn float_compare(
        &mut self,
        instruction: &'static str,
        op: fn(f64, f64) -> bool,
    ) -> Result<(), VMError> {
        let second = self.stack.pop_float(instruction)?;
        let first = self.stack.pop_float(instruction)?;
        self.stack.push(Value::Integer(op(first, second) as i32));
        Ok(())
    }

    fn float_unary(
        &mut self,
        instruction: &'static str,
        op: fn(f64) -> f64,
    ) -> Result<(), VMError> {
        let value = self.stack.pop_float(instruction)?;
        self.stack.push(Value::Float(op(value)));
        Ok(())
    }

    fn op_not(&mut self) -> Result<(), VMError> {
        let value = self.stack.pop_integer("not")?;
        self.stack.push(Value::Integer((value == 0) as i32));
        Ok(())
    }

    // ==================== I/O ====================

    fn op_write_integer(&mut self, instruction: &'static str, newline: bool) -> Result<(), VMError> {
        let value = self.stack.pop_integer(instruction)?;
        if newline {
            writeln!(self.output, "{}", value)?;
        } else {
            write!(self.output, "{}", value)?;
        }
        self.output.flush()?;
        Ok(())
    }

    fn op_write_float(&mut self, instruction: &'static str, newline: bool) -> Result<(), VMError> {
        let value = self.stack.pop_float(instruction)?;
        if newline {
            writeln!(self.output, "{}", value)?;
        } else {
            write!(self.output, "{}", value)?;
        }
        self.output.flush()?;
        Ok(())
    }

    fn op_write_string(&mut self, instruction: &'static str, newline: bool) -> Result<(), VMError> {
        let address = self.stack.pop_string_address(instruction)?;
        let bytes = self.strings.load_all(address)?;
        self.output.write_all(bytes)?;
        if newline {
            self.output.write_all(b"\n")?;
        }
        self.output.flush()?;
        Ok(())
    }

    fn op_read(&mut self) -> Result<(), VMError> {
        let mut line = Vec::new();
        let mut limited = (&mut self.input).take(MAX_READ_LINE);
        limited.read_until(b'\n', &mut line)?;
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        let base = self.strings.adopt(line);
        self.stack.push(Value::AddressString(base));
        Ok(())
    }
}

/// Rejects negative counts on `dup`, `pop`, `pushn` and their stack-operand
/// forms.
fn non_negative(instruction: &'static str, count: i32) -> Result<usize, VMError> {
    if count < 0 {
        return Err(VMError::InvalidOperand {
            instruction,
            operand: count.to_string(),
        });
    }
    Ok(count as usize)
}

/// Floor division: the quotient is rounded toward negative infinity.
fn floor_div(a: i32, b: i32) -> Result<i32, VMError> {
    if b == 0 {
        return Err(VMError::DivisionByZero);
    }
    let quotient = a.wrapping_div(b);
    let remainder = a.wrapping_rem(b);
    if remainder != 0 && (remainder < 0) != (b < 0) {
        Ok(quotient - 1)
    } else {
        Ok(quotient)
    }
}

/// Floor modulo: the result has the divisor's sign, matching `floor_div`.
fn floor_mod(a: i32, b: i32) -> Result<i32, VMError> {
    if b == 0 {
        return Err(VMError::DivisionByZero);
    }
    let remainder = a.wrapping_rem(b);
    if remainder != 0 && (remainder < 0) != (b < 0) {
        Ok(remainder + b)
    } else {
        Ok(remainder)
    }
}
