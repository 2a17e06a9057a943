//! The `int 0x80` system call table.
//!
//! User mode passes the call number in `eax` and up to three arguments in
//! `ebx`, `ecx` and `edx`. The result comes back in `eax`; failures are
//! reported as `-errno`.

use crate::Kernel;
use crate::cpu::Cpu;
use crate::error::Errno;
use kernel_vmem::PhysMapper;
use log::{trace, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum Sysno {
    /// `exit(status)`: terminate the calling thread.
    Exit = 1,
    /// `sbrk(increment)`: grow the heap, returning the previous break.
    Sbrk = 2,
    /// `sleep(ms)`: block for at least `ms` milliseconds.
    Sleep = 3,
    GetPid = 4,
    /// `wait()`: reap an exited child, returning its pid.
    Wait = 5,
}

impl TryFrom<u32> for Sysno {
    type Error = Errno;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Exit),
            2 => Ok(Self::Sbrk),
            3 => Ok(Self::Sleep),
            4 => Ok(Self::GetPid),
            5 => Ok(Self::Wait),
            _ => Err(Errno::ENOSYS),
        }
    }
}

/// General-purpose registers as pushed by the syscall stub (`pushad`).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SyscallFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

impl<M: PhysMapper, C: Cpu> Kernel<M, C> {
    /// Dispatch the call described by `frame` and store the result in its
    /// `eax`.
    pub fn handle_syscall(&self, frame: &mut SyscallFrame) {
        let result = self.syscall(frame.eax, [frame.ebx, frame.ecx, frame.edx]);
        frame.eax = result.cast_unsigned();
    }

    /// Run system call `number` for the current thread.
    pub fn syscall(&self, number: u32, args: [u32; 3]) -> i32 {
        let sysno = match Sysno::try_from(number) {
            Ok(sysno) => sysno,
            Err(errno) => {
                warn!("Unknown system call {number} from {}", self.current_tid());
                return errno.to_return();
            }
        };
        trace!("{sysno:?}({args:?}) from {}", self.current_tid());

        match sysno {
            Sysno::Exit => {
                self.exit_current(args[0].cast_signed());
                0
            }
            Sysno::Sbrk => match self.sbrk(self.current_pid(), args[0].cast_signed()) {
                Ok(brk) => brk.as_u32().cast_signed(),
                Err(e) => Errno::from(e).to_return(),
            },
            Sysno::Sleep => {
                self.sleep_ms(args[0]);
                0
            }
            Sysno::GetPid => self.current_pid().as_u32().cast_signed(),
            Sysno::Wait => match self.wait_child(self.current_pid()) {
                Ok((child, _)) => child.as_u32().cast_signed(),
                Err(e) => Errno::from(e).to_return(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_map_to_calls() {
        assert_eq!(Sysno::try_from(1), Ok(Sysno::Exit));
        assert_eq!(Sysno::try_from(2), Ok(Sysno::Sbrk));
        assert_eq!(Sysno::try_from(5), Ok(Sysno::Wait));
        assert_eq!(Sysno::try_from(0), Err(Errno::ENOSYS));
        assert_eq!(Sysno::try_from(6), Err(Errno::ENOSYS));
    }

    #[test]
    fn frame_matches_pushad_layout() {
        assert_eq!(size_of::<SyscallFrame>(), 8 * 4);
        assert_eq!(core::mem::offset_of!(SyscallFrame, eax), 7 * 4);
    }
}
