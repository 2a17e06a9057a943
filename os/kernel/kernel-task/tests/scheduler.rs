mod common;

use common::{Rng, boot, spawn_kernel, spawn_user, switch_to, tick, trap};
use kernel_memory_addresses::VirtualAddress;
use kernel_task::sim::{TRAMPOLINE, UserEntry};
use kernel_task::{SwitchFrame, ThreadState, Tid, WaitReason};
use kernel_sync::InterruptControl;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn boot_thread_runs_and_system_threads_are_ready() {
    let k = boot();
    assert_eq!(k.current_tid(), Tid::new(0));
    assert_eq!(k.thread_state(Tid::new(0)), Some(ThreadState::Running));

    let idle = k.idle_tid().unwrap();
    assert_eq!(k.ready_queue(), [idle, Tid::new(2)]);
    assert_eq!(k.with_thread(idle, |t| t.priority()), Some(u8::MAX));
}

#[test]
fn ready_threads_take_turns_in_fifo_order() {
    let k = boot();
    let workers = [spawn_kernel(k), spawn_kernel(k), spawn_kernel(k)];
    let population = k.ready_queue().len() + 1;

    let order: Vec<Tid> = (0..population * 4).map(|_| tick(k).tid).collect();

    for round in order.chunks(population) {
        let distinct: HashSet<_> = round.iter().collect();
        assert_eq!(distinct.len(), population, "every thread runs once per round");
    }
    assert!(order.windows(population + 1).all(|w| w[0] == w[population]));

    let first = |tid| order.iter().position(|t| *t == tid).unwrap();
    assert!(first(workers[0]) < first(workers[1]));
    assert!(first(workers[1]) < first(workers[2]));
}

#[test]
fn ready_queue_only_holds_ready_threads() {
    let k = boot();
    for _ in 0..4 {
        spawn_kernel(k);
    }
    let mut rng = Rng::new(0x1234_5678);
    for _ in 0..200 {
        if rng.below(2) == 0 { trap(k) } else { tick(k) };
        for tid in k.ready_queue() {
            assert_eq!(k.thread_state(tid), Some(ThreadState::Ready));
        }
        assert_eq!(k.thread_state(k.current_tid()), Some(ThreadState::Running));
    }
}

#[test]
fn new_thread_starts_at_the_trampoline() {
    let k = boot();
    let tid = spawn_kernel(k);
    let (sp, stack) = k
        .with_thread(tid, |t| (t.saved_sp(), t.kernel_stack().unwrap()))
        .unwrap();

    assert_eq!(sp, stack.as_u32() + 8192 - SwitchFrame::SIZE);
    let frame: SwitchFrame = k
        .kernel_space()
        .read(k.mapper(), VirtualAddress::new(sp))
        .unwrap();
    assert_eq!(frame, SwitchFrame::initial(TRAMPOLINE));
    assert!(!frame.eflags().contains(kernel_task::EFlags::INTERRUPT));

    switch_to(k, tid);
    let resumed = k.with_thread(tid, |t| t.saved_sp()).unwrap();
    assert_eq!(resumed, sp);
}

#[test]
fn sleepers_wake_after_their_ticks() {
    let k = boot();
    let sleeper = spawn_kernel(k);
    switch_to(k, sleeper);

    let traps = k.cpu().trap_count();
    k.sleep_ticks(3);
    assert_eq!(k.cpu().trap_count(), traps + 1);
    assert_eq!(
        k.thread_state(sleeper),
        Some(ThreadState::Waiting(WaitReason::Sleep { remaining: 3 }))
    );
    assert_eq!(k.waiting_queue(), [sleeper]);

    let next = trap(k);
    assert_ne!(next.tid, sleeper);

    tick(k);
    tick(k);
    assert!(k.thread_state(sleeper).unwrap().is_waiting());
    assert!(!k.ready_queue().contains(&sleeper));

    // The sleeper is woken before the interrupted thread is requeued.
    let interrupted = k.current_tid();
    tick(k);
    assert_eq!(k.thread_state(sleeper), Some(ThreadState::Ready));
    let ready = k.ready_queue();
    assert_eq!(ready.last(), Some(&interrupted));
    assert_eq!(ready[ready.len() - 2], sleeper);
    assert!(k.waiting_queue().is_empty());
    assert_eq!(k.ticks(), 3);
}

#[test]
fn sleep_rounds_milliseconds_up_to_ticks() {
    let k = boot();
    let a = spawn_kernel(k);
    let b = spawn_kernel(k);

    switch_to(k, a);
    k.sleep_ms(25);
    assert_eq!(
        k.thread_state(a),
        Some(ThreadState::Waiting(WaitReason::Sleep { remaining: 3 }))
    );

    switch_to(k, b);
    k.sleep_ms(0);
    assert_eq!(
        k.thread_state(b),
        Some(ThreadState::Waiting(WaitReason::Sleep { remaining: 1 }))
    );
}

#[test]
fn zero_tick_sleep_only_yields() {
    let k = boot();
    let t = spawn_kernel(k);
    switch_to(k, t);
    k.sleep_ticks(0);
    assert_eq!(k.thread_state(t), Some(ThreadState::Running));
    assert!(k.waiting_queue().is_empty());
}

#[test]
fn every_tick_is_acknowledged_once() {
    let k = boot();
    // Run the system threads once so no tick enters a new thread.
    switch_to(k, Tid::new(2));
    switch_to(k, Tid::new(0));

    let before = k.cpu().eoi_count();
    for _ in 0..5 {
        assert!(!tick(k).first_run);
    }
    assert_eq!(k.cpu().eoi_count(), before + 5);
    assert_eq!(k.ticks(), 5);
}

#[test]
fn tick_into_a_new_thread_is_acknowledged_by_its_trampoline() {
    let k = boot();
    let fresh = k.spawn_kernel_thread(common::noop, 0).unwrap();
    switch_to(k, Tid::new(2));

    let eois = k.cpu().eoi_count();
    let switch = tick(k);
    assert_eq!(switch.tid, fresh);
    assert!(switch.first_run);
    assert_eq!(k.cpu().eoi_count(), eois);

    k.enter_current_thread();
    assert_eq!(k.cpu().eoi_count(), eois + 1);

    // The next tick leaves `fresh` for a thread that already ran.
    assert!(!tick(k).first_run);
    assert_eq!(k.cpu().eoi_count(), eois + 2);
}

#[test]
fn directory_is_reloaded_only_when_it_changes() {
    let k = boot();
    let kernel_dir = k.kernel_space().directory();
    let a = spawn_kernel(k);
    let b = spawn_kernel(k);
    let pid = k.create_process("/bin/init", None).unwrap();
    let user = spawn_user(k, pid, 0);
    let user_dir = k.space_of(pid).unwrap().directory();

    let loads = k.cpu().mmu().load_count();
    switch_to(k, a);
    switch_to(k, b);
    assert_eq!(k.cpu().mmu().load_count(), loads);

    switch_to(k, user);
    assert_eq!(k.cpu().mmu().load_count(), loads + 1);
    assert_eq!(k.cpu().mmu().active_directory(), Some(user_dir));

    switch_to(k, a);
    assert_eq!(k.cpu().mmu().load_count(), loads + 2);
    assert_eq!(k.cpu().mmu().active_directory(), Some(kernel_dir));
}

static ENTERED: AtomicUsize = AtomicUsize::new(0);

fn count_arg(arg: usize) {
    ENTERED.fetch_add(arg, Ordering::SeqCst);
}

#[test]
fn kernel_thread_runs_its_entry_and_exits() {
    let k = boot();
    let tid = k.spawn_kernel_thread(count_arg, 5).unwrap();
    switch_to(k, tid);
    k.cpu().disable();

    let eois = k.cpu().eoi_count();
    k.enter_current_thread();

    assert_eq!(ENTERED.load(Ordering::SeqCst), 5);
    // Entered through the schedule trap: there is no tick to acknowledge.
    assert_eq!(k.cpu().eoi_count(), eois);
    assert!(k.cpu().are_enabled());
    assert_eq!(k.thread_state(tid), Some(ThreadState::Terminated));
    assert_eq!(k.terminated_queue(), [tid]);
}

#[test]
fn user_thread_enters_user_mode_on_its_stack() {
    let k = boot();
    let pid = k.create_process("/bin/sh", None).unwrap();
    let tid = spawn_user(k, pid, 0xABCD);
    switch_to(k, tid);
    k.enter_current_thread();

    let stack = k
        .with_thread(tid, |t| t.kind().user_stack().unwrap())
        .unwrap();
    assert_eq!(stack.top(), VirtualAddress::new(0xBFFF_F000));
    assert_eq!(
        k.cpu().user_entries(),
        [UserEntry {
            entry: VirtualAddress::new(common::USER_ENTRY),
            stack: stack.initial_sp(),
        }]
    );

    let pushed: [u32; 2] = k
        .space_of(pid)
        .unwrap()
        .read(k.mapper(), stack.initial_sp())
        .unwrap();
    assert_eq!(pushed, [0, 0xABCD]);
}

#[test]
fn switching_to_a_user_thread_programs_its_kernel_stack() {
    let k = boot();
    let worker = spawn_kernel(k);
    let pid = k.create_process("/bin/sh", None).unwrap();
    let first = spawn_user(k, pid, 0);
    let second = spawn_user(k, pid, 1);
    let top = |tid| k.with_thread(tid, |t| t.kernel_stack_top()).unwrap();

    switch_to(k, worker);
    assert_eq!(k.cpu().kernel_stack_top(), None);

    switch_to(k, first);
    assert_eq!(k.cpu().kernel_stack_top(), top(first));
    switch_to(k, second);
    assert_eq!(k.cpu().kernel_stack_top(), top(second));
    assert_ne!(top(first), top(second));

    // Kernel threads never trap in from user mode and leave it alone.
    switch_to(k, worker);
    assert_eq!(k.cpu().kernel_stack_top(), top(second));
}

#[test]
fn user_stacks_of_one_process_do_not_overlap() {
    let k = boot();
    let pid = k.create_process("/bin/threads", None).unwrap();
    let stacks: Vec<_> = (0..3)
        .map(|i| spawn_user(k, pid, i))
        .map(|tid| k.with_thread(tid, |t| t.kind().user_stack().unwrap()).unwrap())
        .collect();

    // Each slot sits below the previous one, one guard page apart.
    for pair in stacks.windows(2) {
        let (upper, lower) = (pair[0], pair[1]);
        assert_eq!(lower.top().as_u32() + 4096, upper.base.as_u32());
    }
    let regions = k.with_process(pid, |p| p.mmap().regions().len()).unwrap();
    assert_eq!(regions, 3);
}

#[test]
fn scheduler_lock_nests_and_restores_interrupts() {
    let k = boot();
    assert!(k.cpu().are_enabled());
    {
        let _outer = k.lock_scheduler();
        let inner = k.lock_scheduler();
        assert!(!k.cpu().are_enabled());
        drop(inner);
        assert!(!k.cpu().are_enabled());
    }
    assert!(k.cpu().are_enabled());
    assert_eq!(k.irq().depth(), 0);
}
