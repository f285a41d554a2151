//! C-compatible foreign surface.
//!
//! Exposes the parser, bytecode reader, source map and VM as opaque handles
//! under `stackvm_`-prefixed symbols, plus a `#[repr(C)]` tagged value for
//! stack access. The crate builds as a `cdylib`, so non-native callers load
//! `libstackvm` and drive these entry points directly.
//!
//! Allocation is backed by the global allocator; the allocator handle exists
//! for ABI compatibility with embedders that thread one through. Every
//! handle-taking function is null-safe: a null handle is a no-op or yields
//! an empty result.

use crate::assembler::Parser;
use crate::bytecode::Reader;
use crate::source_map::{InstructionSpan, SourceMap, TextPosition};
use crate::value::Value;
use crate::vm::VM;

/// Opaque allocator handle.
pub struct Allocator;

/// Value kinds crossing the boundary. `NONE` marks "no value" and never
/// appears on the operand stack.
const KIND_NONE: u8 = 0;
const KIND_INTEGER: u8 = 1;
const KIND_FLOAT: u8 = 2;
const KIND_ADDRESS_HEAP: u8 = 3;
const KIND_ADDRESS_STRING: u8 = 4;
const KIND_ADDRESS_CODE: u8 = 5;
const KIND_ADDRESS_STACK: u8 = 6;

#[repr(C)]
#[derive(Clone, Copy)]
pub union FfiValuePayload {
    integer: i32,
    float: f64,
    size: usize,
}

/// A tagged value crossing the foreign boundary by value.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FfiValue {
    kind: u8,
    value: FfiValuePayload,
}

impl FfiValue {
    fn none() -> Self {
        Self {
            kind: KIND_NONE,
            value: FfiValuePayload { size: 0 },
        }
    }

    fn from_value(value: Value) -> Self {
        match value {
            Value::Integer(v) => Self {
                kind: KIND_INTEGER,
                value: FfiValuePayload { integer: v },
            },
            Value::Float(v) => Self {
                kind: KIND_FLOAT,
                value: FfiValuePayload { float: v },
            },
            Value::AddressHeap(v) => Self {
                kind: KIND_ADDRESS_HEAP,
                value: FfiValuePayload { size: v },
            },
            Value::AddressString(v) => Self {
                kind: KIND_ADDRESS_STRING,
                value: FfiValuePayload { size: v },
            },
            Value::AddressCode(v) => Self {
                kind: KIND_ADDRESS_CODE,
                value: FfiValuePayload { size: v },
            },
            Value::AddressStack(v) => Self {
                kind: KIND_ADDRESS_STACK,
                value: FfiValuePayload { size: v },
            },
        }
    }
}

fn address_value(kind: u8, payload: usize) -> Option<Value> {
    match kind {
        KIND_ADDRESS_HEAP => Some(Value::AddressHeap(payload)),
        KIND_ADDRESS_STRING => Some(Value::AddressString(payload)),
        KIND_ADDRESS_CODE => Some(Value::AddressCode(payload)),
        KIND_ADDRESS_STACK => Some(Value::AddressStack(payload)),
        _ => None,
    }
}

unsafe fn handle_ref<'a, T>(ptr: *const T) -> Option<&'a T> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { &*ptr })
    }
}

unsafe fn handle_mut<'a, T>(ptr: *mut T) -> Option<&'a mut T> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { &mut *ptr })
    }
}

/// Writes a borrowed byte string through `out_len`, returning its pointer.
fn export_str(text: Option<&str>, out_len: *mut usize) -> *const u8 {
    let (ptr, len) = match text {
        Some(text) => (text.as_ptr(), text.len()),
        None => (std::ptr::null(), 0),
    };
    if !out_len.is_null() {
        unsafe { *out_len = len };
    }
    ptr
}

// ==================== Allocator ====================

#[unsafe(no_mangle)]
pub extern "C" fn stackvm_allocator_init() -> *mut Allocator {
    Box::into_raw(Box::new(Allocator))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_allocator_deinit(allocator: *mut Allocator) {
    if !allocator.is_null() {
        drop(unsafe { Box::from_raw(allocator) });
    }
}

// ==================== Positions and spans ====================

#[unsafe(no_mangle)]
pub extern "C" fn stackvm_textposition_init(line: u32, column: u32, offset: u32) -> TextPosition {
    TextPosition::new(line, column, offset)
}

#[unsafe(no_mangle)]
pub extern "C" fn stackvm_textposition_init_empty() -> TextPosition {
    TextPosition::default()
}

#[unsafe(no_mangle)]
pub extern "C" fn stackvm_instructionspan_init(
    instruction: usize,
    start: TextPosition,
    end: TextPosition,
) -> InstructionSpan {
    InstructionSpan {
        instruction,
        start,
        end,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn stackvm_instructionspan_init_empty() -> InstructionSpan {
    InstructionSpan::default()
}

// ==================== Parser ====================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_parser_init(
    _allocator: *mut Allocator,
    source: *const u8,
    source_len: usize,
) -> *mut Parser {
    if source.is_null() {
        return std::ptr::null_mut();
    }
    let bytes = unsafe { std::slice::from_raw_parts(source, source_len) };
    let text = String::from_utf8_lossy(bytes).into_owned();
    Box::into_raw(Box::new(Parser::new(text)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_parser_deinit(parser: *mut Parser) {
    if !parser.is_null() {
        drop(unsafe { Box::from_raw(parser) });
    }
}

/// Parses the source, returning a reader handle or null on failure. After a
/// failure the parser holds the error message and position.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_parser_parse(parser: *mut Parser) -> *mut Reader {
    let Some(parser) = (unsafe { handle_mut(parser) }) else {
        return std::ptr::null_mut();
    };
    match parser.parse() {
        Ok(reader) => Box::into_raw(Box::new(reader)),
        Err(_) => std::ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_parser_get_position(parser: *const Parser) -> TextPosition {
    unsafe { handle_ref(parser) }
        .map(|parser| parser.position())
        .unwrap_or_default()
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_parser_get_err_message(
    parser: *const Parser,
    out_len: *mut usize,
) -> *const u8 {
    let message = unsafe { handle_ref(parser) }.and_then(|parser| parser.err_message());
    export_str(message, out_len)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_parser_get_current_line(
    parser: *const Parser,
    out_len: *mut usize,
) -> *const u8 {
    let line = unsafe { handle_ref(parser) }.map(|parser| parser.current_line());
    export_str(line, out_len)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_parser_get_source_span(
    parser: *const Parser,
    start: TextPosition,
    end: TextPosition,
    out_len: *mut usize,
) -> *const u8 {
    let span = unsafe { handle_ref(parser) }.map(|parser| parser.source_span(start, end));
    export_str(span, out_len)
}

/// Transfers the source map out of the parser, leaving it empty.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_parser_take_source_map(parser: *mut Parser) -> *mut SourceMap {
    let Some(parser) = (unsafe { handle_mut(parser) }) else {
        return std::ptr::null_mut();
    };
    Box::into_raw(Box::new(parser.take_source_map()))
}

// ==================== Source map ====================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_sourcemap_find(
    map: *const SourceMap,
    offset: usize,
    out: *mut InstructionSpan,
) -> bool {
    let Some(map) = (unsafe { handle_ref(map) }) else {
        return false;
    };
    match map.find(offset) {
        Some(span) => {
            if !out.is_null() {
                unsafe { *out = *span };
            }
            true
        }
        None => false,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_sourcemap_deinit(map: *mut SourceMap) {
    if !map.is_null() {
        drop(unsafe { Box::from_raw(map) });
    }
}

// ==================== Reader ====================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_reader_get_len(reader: *const Reader) -> usize {
    unsafe { handle_ref(reader) }
        .map(|reader| reader.len())
        .unwrap_or(0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_reader_destroy(_allocator: *mut Allocator, reader: *mut Reader) {
    if !reader.is_null() {
        drop(unsafe { Box::from_raw(reader) });
    }
}

// ==================== Virtual machine ====================

/// Constructs a VM, taking ownership of the reader handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_init(_allocator: *mut Allocator, reader: *mut Reader) -> *mut VM {
    if reader.is_null() {
        return std::ptr::null_mut();
    }
    let reader = unsafe { Box::from_raw(reader) };
    Box::into_raw(Box::new(VM::new(*reader)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_deinit(vm: *mut VM) {
    if !vm.is_null() {
        drop(unsafe { Box::from_raw(vm) });
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_execute(vm: *mut VM) -> bool {
    match unsafe { handle_mut(vm) } {
        Some(vm) => vm.execute().is_ok(),
        None => false,
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_get_last_instruction(vm: *const VM) -> usize {
    unsafe { handle_ref(vm) }
        .map(|vm| vm.last_instruction())
        .unwrap_or(0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_get_err_message(
    vm: *const VM,
    out_len: *mut usize,
) -> *const u8 {
    let message = unsafe { handle_ref(vm) }.and_then(|vm| vm.err_message());
    export_str(message, out_len)
}

// ==================== Registers ====================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_registers_get_frame_pointer(vm: *const VM) -> usize {
    unsafe { handle_ref(vm) }
        .map(|vm| vm.registers().frame_pointer)
        .unwrap_or(0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_registers_set_frame_pointer(vm: *mut VM, value: usize) {
    if let Some(vm) = unsafe { handle_mut(vm) } {
        vm.registers_mut().frame_pointer = value;
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_registers_get_global_pointer(vm: *const VM) -> usize {
    unsafe { handle_ref(vm) }
        .map(|vm| vm.registers().global_pointer)
        .unwrap_or(0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_registers_set_global_pointer(vm: *mut VM, value: usize) {
    if let Some(vm) = unsafe { handle_mut(vm) } {
        vm.registers_mut().global_pointer = value;
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_registers_get_code_pointer(vm: *const VM) -> usize {
    unsafe { handle_ref(vm) }
        .map(|vm| vm.code_pointer())
        .unwrap_or(0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_registers_set_code_pointer(vm: *mut VM, value: usize) {
    if let Some(vm) = unsafe { handle_mut(vm) } {
        vm.set_code_pointer(value);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_registers_get_stack_pointer(vm: *const VM) -> usize {
    unsafe { handle_ref(vm) }
        .map(|vm| vm.stack_pointer())
        .unwrap_or(0)
}

/// Forces the stack pointer: the operand stack is truncated or extended
/// with zero-integers to the requested length.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_registers_set_stack_pointer(vm: *mut VM, value: usize) {
    if let Some(vm) = unsafe { handle_mut(vm) } {
        vm.set_stack_pointer(value);
    }
}

// ==================== Values ====================

#[unsafe(no_mangle)]
pub extern "C" fn stackvm_value_int(value: i32) -> FfiValue {
    FfiValue::from_value(Value::Integer(value))
}

#[unsafe(no_mangle)]
pub extern "C" fn stackvm_value_float(value: f64) -> FfiValue {
    FfiValue::from_value(Value::Float(value))
}

/// Builds an address value of the given kind; an unknown kind yields the
/// `None` value.
#[unsafe(no_mangle)]
pub extern "C" fn stackvm_value_size(kind: u8, value: usize) -> FfiValue {
    match address_value(kind, value) {
        Some(value) => FfiValue::from_value(value),
        None => FfiValue::none(),
    }
}

// ==================== Operand stack ====================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_stack_get_len(vm: *const VM) -> usize {
    unsafe { handle_ref(vm) }
        .map(|vm| vm.stack_len())
        .unwrap_or(0)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_stack_load(vm: *const VM, index: usize) -> FfiValue {
    unsafe { handle_ref(vm) }
        .and_then(|vm| vm.stack_load(index).ok())
        .map(FfiValue::from_value)
        .unwrap_or_else(FfiValue::none)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_stack_store_int(vm: *mut VM, index: usize, value: i32) {
    if let Some(vm) = unsafe { handle_mut(vm) } {
        let _ = vm.stack_store(index, Value::Integer(value));
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_stack_store_float(vm: *mut VM, index: usize, value: f64) {
    if let Some(vm) = unsafe { handle_mut(vm) } {
        let _ = vm.stack_store(index, Value::Float(value));
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_stack_store_address(
    vm: *mut VM,
    index: usize,
    kind: u8,
    value: usize,
) {
    let Some(value) = address_value(kind, value) else {
        return;
    };
    if let Some(vm) = unsafe { handle_mut(vm) } {
        let _ = vm.stack_store(index, value);
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_stack_push_int(vm: *mut VM, value: i32) {
    if let Some(vm) = unsafe { handle_mut(vm) } {
        vm.stack_push(Value::Integer(value));
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_stack_push_float(vm: *mut VM, value: f64) {
    if let Some(vm) = unsafe { handle_mut(vm) } {
        vm.stack_push(Value::Float(value));
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_stack_push_address(vm: *mut VM, kind: u8, value: usize) {
    let Some(value) = address_value(kind, value) else {
        return;
    };
    if let Some(vm) = unsafe { handle_mut(vm) } {
        vm.stack_push(value);
    }
}

/// Pops the topmost value; an empty stack yields the `None` value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn stackvm_stack_pop(vm: *mut VM) -> FfiValue {
    unsafe { handle_mut(vm) }
        .and_then(|vm| vm.stack_pop().ok())
        .map(FfiValue::from_value)
        .unwrap_or_else(FfiValue::none)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_constructors_tag_correctly() {
        let value = stackvm_value_int(-5);
        assert_eq!(value.kind, KIND_INTEGER);
        assert_eq!(unsafe { value.value.integer }, -5);

        let value = stackvm_value_float(1.5);
        assert_eq!(value.kind, KIND_FLOAT);
        assert_eq!(unsafe { value.value.float }, 1.5);

        let value = stackvm_value_size(KIND_ADDRESS_HEAP, 64);
        assert_eq!(value.kind, KIND_ADDRESS_HEAP);
        assert_eq!(unsafe { value.value.size }, 64);

        let value = stackvm_value_size(99, 64);
        assert_eq!(value.kind, KIND_NONE);
    }

    #[test]
    fn parse_and_execute_through_handles() {
        let source = b"pushi 2 pushi 3 add stop";
        let allocator = stackvm_allocator_init();
        let parser =
            unsafe { stackvm_parser_init(allocator, source.as_ptr(), source.len()) };
        let reader = unsafe { stackvm_parser_parse(parser) };
        assert!(!reader.is_null());
        assert!(unsafe { stackvm_reader_get_len(reader) } > 0);

        let vm = unsafe { stackvm_init(allocator, reader) };
        assert!(unsafe { stackvm_execute(vm) });
        assert_eq!(unsafe { stackvm_stack_get_len(vm) }, 1);
        let top = unsafe { stackvm_stack_pop(vm) };
        assert_eq!(top.kind, KIND_INTEGER);
        assert_eq!(unsafe { top.value.integer }, 5);

        unsafe {
            stackvm_deinit(vm);
            stackvm_parser_deinit(parser);
            stackvm_allocator_deinit(allocator);
        }
    }

    #[test]
    fn parse_failure_reports_through_parser() {
        let source = b"bogus";
        let parser =
            unsafe { stackvm_parser_init(std::ptr::null_mut(), source.as_ptr(), source.len()) };
        let reader = unsafe { stackvm_parser_parse(parser) };
        assert!(reader.is_null());

        let mut len = 0usize;
        let message = unsafe { stackvm_parser_get_err_message(parser, &mut len) };
        assert!(!message.is_null());
        let text = unsafe { std::slice::from_raw_parts(message, len) };
        assert_eq!(text, b"unknown instruction 'bogus'");

        unsafe { stackvm_parser_deinit(parser) };
    }

    #[test]
    fn null_handles_are_inert() {
        assert_eq!(unsafe { stackvm_stack_get_len(std::ptr::null()) }, 0);
        assert!(!unsafe { stackvm_execute(std::ptr::null_mut()) });
        assert_eq!(unsafe { stackvm_reader_get_len(std::ptr::null()) }, 0);
        let value = unsafe { stackvm_stack_pop(std::ptr::null_mut()) };
        assert_eq!(value.kind, KIND_NONE);
        unsafe {
            stackvm_parser_deinit(std::ptr::null_mut());
            stackvm_deinit(std::ptr::null_mut());
            stackvm_sourcemap_deinit(std::ptr::null_mut());
        }
    }

    #[test]
    fn source_map_travels_through_the_boundary() {
        let source = b"pushi 1 stop";
        let parser =
            unsafe { stackvm_parser_init(std::ptr::null_mut(), source.as_ptr(), source.len()) };
        let reader = unsafe { stackvm_parser_parse(parser) };
        assert!(!reader.is_null());
        let map = unsafe { stackvm_parser_take_source_map(parser) };

        let mut span = stackvm_instructionspan_init_empty();
        assert!(unsafe { stackvm_sourcemap_find(map, 0, &mut span) });
        assert_eq!(span.instruction, 0);

        unsafe {
            stackvm_sourcemap_deinit(map);
            stackvm_reader_destroy(std::ptr::null_mut(), reader);
            stackvm_parser_deinit(parser);
        }
    }
}
