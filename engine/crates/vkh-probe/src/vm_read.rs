//! 不会触发硬件异常的内存读取
//!
//! 这是整个 workspace 中唯一一处读取不受信任地址的地方。读取通过内核完成：
//! 地址未映射时内核返回错误码，而不是向进程发送 SIGSEGV / SIGBUS。
//!
//! - Apple：`mach_vm_read_overwrite`
//! - Linux / Android：`process_vm_readv` 读取自身进程；被 seccomp 等禁用时退回到
//!   向 pipe 写入目标地址的方式（`write` 对无效地址返回 `EFAULT`）
//! - 其他平台：不支持，所有读取都视为失败

/// 读取 `address` 处的一个 64 位字
///
/// 地址未映射、不可读或平台不支持时返回 `None`，任何输入都不会使进程崩溃。
pub fn try_read_word(address: usize) -> Option<u64> {
    if address == 0 {
        return None;
    }
    platform::read_word(address)
}

#[cfg(target_vendor = "apple")]
mod platform {
    use mach2::kern_return::KERN_SUCCESS;
    use mach2::traps::mach_task_self;
    use mach2::vm::mach_vm_read_overwrite;
    use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t};

    pub(super) fn read_word(address: usize) -> Option<u64> {
        let mut value: u64 = 0;
        let mut out_size: mach_vm_size_t = 0;
        let kr = unsafe {
            mach_vm_read_overwrite(
                mach_task_self(),
                address as mach_vm_address_t,
                size_of::<u64>() as mach_vm_size_t,
                &mut value as *mut u64 as mach_vm_address_t,
                &mut out_size,
            )
        };
        (kr == KERN_SUCCESS && out_size == size_of::<u64>() as mach_vm_size_t).then_some(value)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod platform {
    use std::sync::atomic::{AtomicBool, Ordering};

    /// process_vm_readv 不可用时置位，之后直接走 pipe
    static VM_READV_UNAVAILABLE: AtomicBool = AtomicBool::new(false);

    const WORD: usize = size_of::<u64>();

    pub(super) fn read_word(address: usize) -> Option<u64> {
        if !VM_READV_UNAVAILABLE.load(Ordering::Relaxed) {
            match read_with_vm_readv(address) {
                Ok(value) => return value,
                Err(errno) => {
                    log::warn!("process_vm_readv unavailable (errno {}), falling back to pipe probing", errno);
                    VM_READV_UNAVAILABLE.store(true, Ordering::Relaxed);
                }
            }
        }
        read_with_pipe(address)
    }

    /// `Ok(None)` 表示地址不可读；`Err` 表示系统调用本身不可用
    fn read_with_vm_readv(address: usize) -> Result<Option<u64>, i32> {
        let mut value: u64 = 0;
        let local = libc::iovec {
            iov_base: (&mut value as *mut u64).cast(),
            iov_len: WORD,
        };
        let remote = libc::iovec {
            iov_base: address as *mut libc::c_void,
            iov_len: WORD,
        };

        let n = unsafe { libc::process_vm_readv(libc::getpid(), &local, 1, &remote, 1, 0) };
        if n == WORD as isize {
            return Ok(Some(value));
        }
        if n >= 0 {
            return Ok(None);
        }
        match errno() {
            libc::EFAULT | libc::ESRCH | libc::EINVAL => Ok(None),
            other => Err(other),
        }
    }

    fn read_with_pipe(address: usize) -> Option<u64> {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) } != 0 {
            return None;
        }
        let [read_fd, write_fd] = fds;

        let mut value: u64 = 0;
        // 内核在拷贝用户内存时检查地址，无效地址得到 EFAULT
        let written = unsafe { libc::write(write_fd, address as *const libc::c_void, WORD) };
        let result = if written == WORD as isize {
            let read = unsafe { libc::read(read_fd, (&mut value as *mut u64).cast(), WORD) };
            (read == WORD as isize).then_some(value)
        } else {
            None
        };

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
        result
    }

    fn errno() -> i32 {
        std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
    }

}

#[cfg(not(any(target_vendor = "apple", target_os = "linux", target_os = "android")))]
mod platform {
    pub(super) fn read_word(_address: usize) -> Option<u64> {
        None
    }
}
