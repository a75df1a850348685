//! Turns a decoded method body into an executable, patched buffer.
//!
//! The buffer is laid out as the original code with every 1-byte call
//! placeholder expanded to its call sequence, followed by the
//! NUL-terminated strings the trampolines resolve through. Call sites
//! whose target class is already loaded get a direct indirect call; the
//! rest get a trampoline that asks the registry at call time.
//!
//! Link faults (a loaded target class without the requested descriptor, a
//! placeholder outside the code, a RIP-relative displacement that does not
//! fit in 32 bits) are fatal: they describe a program that cannot be
//! linked, not a malformed file.

use std::mem;

use crate::class::MethodRef;
use crate::runtime::registry::{get_method_from_descriptor_error, ClassRegistry};
use crate::runtime::Method;

/// mov rax, imm64; call rax
const DIRECT_CALL_LEN: usize = 12;
/// Spill rcx/rdx/r8, call the registry resolver, restore, call through
/// the returned method's code pointer.
const TRAMPOLINE_CALL_LEN: usize = 77;
/// Same, with a 32-bit code-pointer field offset in the final call.
const TRAMPOLINE_CALL_LEN_LARGE: usize = 80;

// RIP anchors of the two lea displacements inside the trampoline
const CLASS_NAME_LEA_END: usize = 46;
const DESCRIPTOR_LEA_END: usize = 53;

enum CallKind {
    Direct { target: u64 },
    Trampoline { class_name: usize, descriptor: usize },
}

struct CallSite {
    byte_offset: usize,
    kind: CallKind,
}

impl CallSite {
    fn sequence_len(&self, trampoline_len: usize) -> usize {
        match self.kind {
            CallKind::Direct { .. } => DIRECT_CALL_LEN,
            CallKind::Trampoline { .. } => trampoline_len,
        }
    }
}

fn code_ptr_field_offset() -> usize {
    mem::offset_of!(Method, code_ptr)
}

pub(crate) fn materialize_method(
    registry: &ClassRegistry,
    method: &mut Method,
    code: Vec<u8>,
    mut method_refs: Vec<MethodRef>,
) {
    // a method without code stays non-invokable
    if code.is_empty() {
        return;
    }

    method_refs.sort_by_key(|method_ref| method_ref.byte_offset);

    // classify each call site once; targets loaded later than this pass
    // still resolve through their trampoline
    let mut strings: Vec<String> = Vec::new();
    let mut sites = Vec::with_capacity(method_refs.len());
    for method_ref in &method_refs {
        let byte_offset = method_ref.byte_offset as usize;
        if byte_offset >= code.len() {
            panic!(
                "method ref placeholder at {byte_offset} is outside the {} code bytes of '{}'",
                code.len(),
                method.name
            );
        }
        let kind = match registry.get_class(&method_ref.class_name) {
            Some(class) => match class.get_method_from_descriptor(&method_ref.method_descriptor) {
                Some(target) => CallKind::Direct {
                    target: target.code_ptr as u64,
                },
                None => panic!(
                    "method wants to invoke a nonexistent method '{}' in class '{}'",
                    method_ref.method_descriptor, method_ref.class_name
                ),
            },
            None => CallKind::Trampoline {
                class_name: intern(&mut strings, &method_ref.class_name),
                descriptor: intern(&mut strings, &method_ref.method_descriptor),
            },
        };
        sites.push(CallSite { byte_offset, kind });
    }

    let code_ptr_offset = code_ptr_field_offset();
    let trampoline_len = if code_ptr_offset > u8::MAX as usize {
        TRAMPOLINE_CALL_LEN_LARGE
    } else {
        TRAMPOLINE_CALL_LEN
    };

    // each site grows the code by its sequence minus the placeholder byte
    let growth: usize = sites
        .iter()
        .map(|site| site.sequence_len(trampoline_len) - 1)
        .sum();
    let data_begin = code.len() + growth;
    let data_len: usize = strings.iter().map(|string| string.len() + 1).sum();

    let mut buf = code;
    let mut code_end = buf.len();
    buf.resize(data_begin + data_len, 0);

    // trailing string table, NUL terminators come from the zero fill
    let mut string_offsets = Vec::with_capacity(strings.len());
    let mut data_offset = 0;
    for string in &strings {
        buf[data_begin + data_offset..data_begin + data_offset + string.len()]
            .copy_from_slice(string.as_bytes());
        string_offsets.push(data_offset);
        data_offset += string.len() + 1;
    }

    let registry_addr = registry as *const ClassRegistry as u64;
    let resolver_addr = get_method_from_descriptor_error as usize as u64;

    // expand the placeholders in ascending order, shifting later code by
    // the growth accumulated so far
    let mut delta = 0;
    for site in &sites {
        let call_begin = delta + site.byte_offset;
        let sequence_len = site.sequence_len(trampoline_len);

        buf.copy_within(call_begin + 1..code_end, call_begin + sequence_len);
        code_end += sequence_len - 1;
        delta += sequence_len - 1;

        let out = &mut buf[call_begin..call_begin + sequence_len];
        match &site.kind {
            CallKind::Direct { target } => emit_direct_call(out, *target),
            CallKind::Trampoline {
                class_name,
                descriptor,
            } => {
                let class_name_disp = rip_displacement(
                    data_begin + string_offsets[*class_name],
                    call_begin + CLASS_NAME_LEA_END,
                );
                let descriptor_disp = rip_displacement(
                    data_begin + string_offsets[*descriptor],
                    call_begin + DESCRIPTOR_LEA_END,
                );
                emit_trampoline_call(
                    out,
                    resolver_addr,
                    registry_addr,
                    class_name_disp,
                    descriptor_disp,
                    code_ptr_offset,
                );
            }
        }
    }
    debug_assert_eq!(code_end, data_begin);

    method.allocate_code(&buf);
    method.make_code_executable();
}

fn intern(strings: &mut Vec<String>, string: &str) -> usize {
    match strings.iter().position(|existing| existing == string) {
        Some(index) => index,
        None => {
            strings.push(string.to_string());
            strings.len() - 1
        }
    }
}

fn rip_displacement(target: usize, anchor: usize) -> i32 {
    match i32::try_from(target as i64 - anchor as i64) {
        Ok(displacement) => displacement,
        Err(_) => panic!("string table displacement does not fit a rip-relative i32"),
    }
}

fn emit_direct_call(out: &mut [u8], target: u64) {
    out[..2].copy_from_slice(&[0x48, 0xB8]); // mov rax, imm64
    out[2..10].copy_from_slice(&target.to_le_bytes());
    out[10..12].copy_from_slice(&[0xFF, 0xD0]); // call rax
}

fn emit_trampoline_call(
    out: &mut [u8],
    resolver: u64,
    registry: u64,
    class_name_disp: i32,
    descriptor_disp: i32,
    code_ptr_offset: usize,
) {
    let mut call = Vec::with_capacity(out.len());
    call.extend_from_slice(&[0x48, 0x83, 0xEC, 0x38]); // sub rsp, 0x38
    call.extend_from_slice(&[0x48, 0x89, 0x4C, 0x24, 0x20]); // mov [rsp+0x20], rcx
    call.extend_from_slice(&[0x48, 0x89, 0x54, 0x24, 0x28]); // mov [rsp+0x28], rdx
    call.extend_from_slice(&[0x4C, 0x89, 0x44, 0x24, 0x30]); // mov [rsp+0x30], r8
    call.extend_from_slice(&[0x48, 0xB8]); // mov rax, resolver
    call.extend_from_slice(&resolver.to_le_bytes());
    call.extend_from_slice(&[0x48, 0xB9]); // mov rcx, registry
    call.extend_from_slice(&registry.to_le_bytes());
    call.extend_from_slice(&[0x48, 0x8D, 0x15]); // lea rdx, [rip + class name]
    call.extend_from_slice(&class_name_disp.to_le_bytes());
    call.extend_from_slice(&[0x4C, 0x8D, 0x05]); // lea r8, [rip + descriptor]
    call.extend_from_slice(&descriptor_disp.to_le_bytes());
    call.extend_from_slice(&[0xFF, 0xD0]); // call rax
    call.extend_from_slice(&[0x48, 0x8B, 0x4C, 0x24, 0x20]); // mov rcx, [rsp+0x20]
    call.extend_from_slice(&[0x48, 0x8B, 0x54, 0x24, 0x28]); // mov rdx, [rsp+0x28]
    call.extend_from_slice(&[0x4C, 0x8B, 0x44, 0x24, 0x30]); // mov r8, [rsp+0x30]
    call.extend_from_slice(&[0x48, 0x83, 0xC4, 0x38]); // add rsp, 0x38
    if code_ptr_offset > u8::MAX as usize {
        call.extend_from_slice(&[0xFF, 0x90]); // call [rax + imm32]
        call.extend_from_slice(&(code_ptr_offset as u32).to_le_bytes());
    } else {
        call.extend_from_slice(&[0xFF, 0x50, code_ptr_offset as u8]); // call [rax + imm8]
    }
    out.copy_from_slice(&call);
}
