use std::ffi::CStr;

use crate::runtime::ForeignRuntime;
use crate::vm_read::try_read_word;

/// 指针高字节不为 0 时，isa 不是普通指针（tagged / non-pointer isa），读不到也仍可能是活对象
pub const TAGGED_POINTER_MASK: u64 = 0xff00_0000_0000_0000;

/// 期望的外部对象身份：具体类名，或者协议名
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedIdentity {
    pub class_name: &'static CStr,
    pub protocol_name: &'static CStr,
}

impl ExpectedIdentity {
    /// Metal sampler：捕获层包装的 sampler 类，或 `MTLSamplerState` 协议
    pub const MTL_SAMPLER_STATE: Self = Self {
        class_name: c"CaptureMTLSamplerState",
        protocol_name: c"MTLSamplerState",
    };
}

/// 外部引用的分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignClass {
    /// 活对象，且身份符合期望
    Matching,
    /// 活对象，但身份不符合
    Mismatched,
    /// 空、空值单例、已释放或不可读
    Invalid,
}

/// 引用是否指向一个可读、且第一个字非 0 的对象
///
/// 成功时返回第一个字（通常是 isa）。空指针与运行时的空值单例直接拒绝，不做读取。
pub fn is_valid_foreign_id(runtime: &impl ForeignRuntime, object: usize) -> Option<u64> {
    if object == 0 || object == runtime.null_sentinel() {
        return None;
    }
    try_read_word(object).filter(|&isa| isa != 0)
}

/// 对外部引用做身份分类，任何输入都不会使进程崩溃
///
/// 1. 引用本身必须有效（见 [`is_valid_foreign_id`]）
/// 2. isa 指向的字可读：为 0 则无效；否则比较对象的类与期望类，或对象本身与期望协议
/// 3. isa 指向的字不可读：只有 isa 高字节非 0（非普通指针）时才比较类，否则无效
pub fn classify(runtime: &impl ForeignRuntime, object: usize, expected: &ExpectedIdentity) -> ForeignClass {
    let Some(isa) = is_valid_foreign_id(runtime, object) else {
        return ForeignClass::Invalid;
    };

    match try_read_word(isa as usize) {
        Some(0) => ForeignClass::Invalid,
        Some(_) => {
            if class_matches(runtime, object, expected) || protocol_matches(runtime, object, expected) {
                ForeignClass::Matching
            } else {
                ForeignClass::Mismatched
            }
        }
        None if isa & TAGGED_POINTER_MASK != 0 => {
            if class_matches(runtime, object, expected) {
                ForeignClass::Matching
            } else {
                ForeignClass::Mismatched
            }
        }
        None => {
            log::trace!("foreign reference {:#x}: isa {:#x} is unreadable", object, isa);
            ForeignClass::Invalid
        }
    }
}

#[inline]
pub fn is_instance_of(runtime: &impl ForeignRuntime, object: usize, expected: &ExpectedIdentity) -> bool {
    classify(runtime, object, expected) == ForeignClass::Matching
}

// 运行时里找不到期望的类或协议时，任何对象都不匹配
fn class_matches(runtime: &impl ForeignRuntime, object: usize, expected: &ExpectedIdentity) -> bool {
    let expected_class = runtime.class_named(expected.class_name);
    expected_class != 0 && unsafe { runtime.class_of(object) } == expected_class
}

fn protocol_matches(runtime: &impl ForeignRuntime, object: usize, expected: &ExpectedIdentity) -> bool {
    let expected_protocol = runtime.protocol_named(expected.protocol_name);
    expected_protocol != 0 && object == expected_protocol
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 模拟运行时：对象第一个字是 isa，isa 低 56 位为类地址
    #[repr(C)]
    #[allow(dead_code)]
    struct FakeClass {
        meta: u64,
    }

    #[repr(C)]
    struct FakeObject {
        isa: u64,
    }

    const ISA_ADDRESS_MASK: u64 = !TAGGED_POINTER_MASK;

    struct MockRuntime {
        sentinel: usize,
        classes: Vec<(&'static CStr, usize)>,
        protocols: Vec<(&'static CStr, usize)>,
    }

    impl ForeignRuntime for MockRuntime {
        fn null_sentinel(&self) -> usize {
            self.sentinel
        }

        unsafe fn class_of(&self, object: usize) -> usize {
            let isa = unsafe { (*(object as *const FakeObject)).isa };
            (isa & ISA_ADDRESS_MASK) as usize
        }

        fn class_named(&self, name: &CStr) -> usize {
            self.classes.iter().find(|(n, _)| *n == name).map_or(0, |(_, cls)| *cls)
        }

        fn protocol_named(&self, name: &CStr) -> usize {
            self.protocols.iter().find(|(n, _)| *n == name).map_or(0, |(_, proto)| *proto)
        }
    }

    /// 测试用的一套类、协议与空值单例；全部 leak，保证地址在整个测试期间有效
    struct World {
        runtime: MockRuntime,
        sampler_class: usize,
        other_class: usize,
        protocol: usize,
    }

    fn leak<T>(value: T) -> usize {
        Box::leak(Box::new(value)) as *mut T as usize
    }

    fn world() -> World {
        let sampler_class = leak(FakeClass { meta: 0x1 });
        let other_class = leak(FakeClass { meta: 0x2 });
        let protocol_class = leak(FakeClass { meta: 0x3 });
        let protocol = leak(FakeObject {
            isa: protocol_class as u64,
        });
        let sentinel = leak(FakeObject {
            isa: other_class as u64,
        });

        World {
            runtime: MockRuntime {
                sentinel,
                classes: vec![(c"CaptureMTLSamplerState", sampler_class), (c"Other", other_class)],
                protocols: vec![(c"MTLSamplerState", protocol)],
            },
            sampler_class,
            other_class,
            protocol,
        }
    }

    fn object_of(class: usize) -> Box<FakeObject> {
        Box::new(FakeObject { isa: class as u64 })
    }

    fn address(object: &FakeObject) -> usize {
        object as *const FakeObject as usize
    }

    const SAMPLER: ExpectedIdentity = ExpectedIdentity::MTL_SAMPLER_STATE;

    #[test]
    fn test_null_is_invalid() {
        let w = world();
        assert_eq!(is_valid_foreign_id(&w.runtime, 0), None);
        assert_eq!(classify(&w.runtime, 0, &SAMPLER), ForeignClass::Invalid);
        assert!(!is_instance_of(&w.runtime, 0, &SAMPLER));
    }

    #[test]
    fn test_null_sentinel_is_invalid() {
        let w = world();
        assert_eq!(is_valid_foreign_id(&w.runtime, w.runtime.sentinel), None);
        assert_eq!(classify(&w.runtime, w.runtime.sentinel, &SAMPLER), ForeignClass::Invalid);
    }

    #[test]
    fn test_zero_first_word_is_invalid() {
        let w = world();
        let zeroed = Box::new(FakeObject { isa: 0 });
        assert_eq!(is_valid_foreign_id(&w.runtime, address(&zeroed)), None);
        assert_eq!(classify(&w.runtime, address(&zeroed), &SAMPLER), ForeignClass::Invalid);
    }

    #[test]
    fn test_valid_id_returns_first_word() {
        let w = world();
        let object = object_of(w.other_class);
        assert_eq!(is_valid_foreign_id(&w.runtime, address(&object)), Some(w.other_class as u64));
    }

    #[test]
    fn test_matching_class() {
        let w = world();
        let sampler = object_of(w.sampler_class);
        assert_eq!(classify(&w.runtime, address(&sampler), &SAMPLER), ForeignClass::Matching);
        assert!(is_instance_of(&w.runtime, address(&sampler), &SAMPLER));
    }

    #[test]
    fn test_other_class_is_mismatched() {
        let w = world();
        let other = object_of(w.other_class);
        assert_eq!(classify(&w.runtime, address(&other), &SAMPLER), ForeignClass::Mismatched);
        assert!(!is_instance_of(&w.runtime, address(&other), &SAMPLER));
    }

    #[test]
    fn test_protocol_object_matches() {
        let w = world();
        assert_eq!(classify(&w.runtime, w.protocol, &SAMPLER), ForeignClass::Matching);
    }

    #[test]
    fn test_unknown_identity_never_matches() {
        let w = world();
        let missing = ExpectedIdentity {
            class_name: c"NoSuchClass",
            protocol_name: c"NoSuchProtocol",
        };
        let object = object_of(w.sampler_class);
        assert_eq!(classify(&w.runtime, address(&object), &missing), ForeignClass::Mismatched);
    }

    #[test]
    fn test_tagged_isa_falls_back_to_class_check() {
        let w = world();
        // 高字节置位后 isa 本身不可读，只能靠类比较
        let tagged = Box::new(FakeObject {
            isa: w.sampler_class as u64 | 0x8000_0000_0000_0000,
        });
        assert_eq!(classify(&w.runtime, address(&tagged), &SAMPLER), ForeignClass::Matching);

        let tagged_other = Box::new(FakeObject {
            isa: w.other_class as u64 | 0x0100_0000_0000_0000,
        });
        assert_eq!(classify(&w.runtime, address(&tagged_other), &SAMPLER), ForeignClass::Mismatched);
    }

    #[test]
    fn test_unreadable_untagged_isa_is_invalid() {
        let w = world();
        let dangling = Box::new(FakeObject { isa: 0x10 });
        assert_eq!(classify(&w.runtime, address(&dangling), &SAMPLER), ForeignClass::Invalid);
    }

    #[cfg(unix)]
    #[test]
    fn test_freed_object_is_invalid() {
        let w = world();
        unsafe {
            let page = libc::sysconf(libc::_SC_PAGESIZE) as usize;
            let ptr = libc::mmap(
                std::ptr::null_mut(),
                page,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            );
            assert_ne!(ptr, libc::MAP_FAILED);
            (ptr as *mut FakeObject).write(FakeObject {
                isa: w.sampler_class as u64,
            });
            assert_eq!(classify(&w.runtime, ptr as usize, &SAMPLER), ForeignClass::Matching);

            assert_eq!(libc::munmap(ptr, page), 0);
            assert_eq!(classify(&w.runtime, ptr as usize, &SAMPLER), ForeignClass::Invalid);
        }
    }

    #[test]
    fn test_garbage_references_never_crash() {
        let w = world();
        for object in [1usize, 0x8, 0xdead_beef, usize::MAX - 7, usize::MAX] {
            assert_eq!(classify(&w.runtime, object, &SAMPLER), ForeignClass::Invalid, "object {:#x}", object);
        }
    }

    #[test]
    fn test_classify_concurrently() {
        let w = std::sync::Arc::new(world());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let w = w.clone();
                std::thread::spawn(move || {
                    let sampler = object_of(w.sampler_class);
                    let other = object_of(w.other_class);
                    for _ in 0..1_000 {
                        assert!(is_instance_of(&w.runtime, address(&sampler), &SAMPLER));
                        assert!(!is_instance_of(&w.runtime, address(&other), &SAMPLER));
                        assert!(!is_instance_of(&w.runtime, 0xdead_beef, &SAMPLER));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_fake_class_metadata_is_readable() {
        let w = world();
        assert_eq!(try_read_word(w.sampler_class), Some(0x1));
        assert_eq!(try_read_word(w.other_class), Some(0x2));
    }
}
