// =============================================================================
// Skylark — Task Scheduler
// =============================================================================
//
// Round-robin over a ring of task ids. Task descriptors live in an
// arena keyed by stable integer ids, so parents, waiters and the
// window system hold ids and can never dangle across a reap.
//
// Each task owns a kernel stack laid out as
//
//   ┌────────────────┬──────────────────────────────┐
//   │ 4 KiB guard    │ usable stack (grows down)    │
//   │ poison pattern │ canary word at the bottom    │
//   └────────────────┴──────────────────────────────┘
//
// The dispatcher validates the target's magic word, guard, canary and
// saved stack pointer on every switch; a violation is corruption and
// halts the kernel.
//
// Lifecycle: ready ↔ running, running → timed-wait/event-wait → ready,
// any → zombie → reaped. A zombie is only reaped once it is no longer
// the current task, and killing a task cascades to every descendant.
// =============================================================================

use alloc::alloc::{alloc, dealloc, Layout};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use khal::cpu;

use crate::arch;
use crate::sync::SpinLock;

/// Stable task identifier. Positive; id 0 is the boot task.
pub type TaskId = u64;

/// Task entry point.
pub type EntryFn = fn(usize);

/// Guard zone below the usable stack.
const GUARD_SIZE: usize = 4096;

/// Pattern written across the guard zone, checked on every switch.
const GUARD_POISON: u64 = 0xA5A5_A5A5_A5A5_A5A5;

/// Sentinel at the bottom of the usable stack region.
const STACK_CANARY: u64 = 0xC0DE_CAFE_DEAD_BEEF;

/// Descriptor validity word.
const TASK_MAGIC: u64 = 0x534B_594C_5441_534B; // "SKYLTASK"

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Stack or descriptor allocation failed.
    OutOfMemory,
    /// No task with that id.
    NotFound,
}

/// Block state; a task is runnable in `Ready` or `Running` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Ready,
    Running,
    /// Sleeping until `now_ms() >= wake_ms`.
    TimedWait(u32),
    /// Parked on an opaque event key.
    EventWait(u64),
    /// Finished; awaiting reap.
    Zombie,
}

/// A kernel stack: guard zone + usable region, raw-allocated so the
/// exact layout is ours.
struct TaskStack {
    base: *mut u8,
    layout: Layout,
}

impl TaskStack {
    fn new(usable: usize) -> Option<Self> {
        let layout = Layout::from_size_align(GUARD_SIZE + usable, 16).ok()?;
        // SAFETY: layout has non-zero size.
        let base = unsafe { alloc(layout) };
        if base.is_null() {
            return None;
        }
        let stack = Self { base, layout };
        // Poison the guard and plant the canary.
        unsafe {
            let words = stack.base as *mut u64;
            for i in 0..GUARD_SIZE / 8 {
                words.add(i).write(GUARD_POISON);
            }
            (stack.canary_addr() as *mut u64).write(STACK_CANARY);
        }
        Some(stack)
    }

    fn usable_bottom(&self) -> usize {
        self.base as usize + GUARD_SIZE
    }

    fn top(&self) -> usize {
        self.base as usize + self.layout.size()
    }

    /// The canary occupies the first word of the usable region.
    fn canary_addr(&self) -> usize {
        self.usable_bottom()
    }

    fn guard_intact(&self) -> bool {
        let words = self.base as *const u64;
        for i in 0..GUARD_SIZE / 8 {
            // SAFETY: the guard zone belongs to this stack.
            if unsafe { words.add(i).read() } != GUARD_POISON {
                return false;
            }
        }
        true
    }

    fn canary_intact(&self) -> bool {
        unsafe { (self.canary_addr() as *const u64).read() == STACK_CANARY }
    }
}

impl Drop for TaskStack {
    fn drop(&mut self) {
        // SAFETY: base/layout came from alloc() in new().
        unsafe {
            dealloc(self.base, self.layout);
        }
    }
}

// SAFETY: stacks are only touched by their owning task or under the
// scheduler lock.
unsafe impl Send for TaskStack {}

/// One task descriptor.
pub struct Task {
    magic: u64,
    pub id: TaskId,
    pub name: String,
    /// Entry function and opaque argument; run once by the trampoline.
    entry: (EntryFn, usize),
    /// `None` for the boot task, which runs on the boot stack.
    stack: Option<TaskStack>,
    /// Saved stack pointer while suspended.
    saved_sp: usize,
    pub state: BlockState,
    pub parent: TaskId,
    /// Tick of the first time this task was scheduled.
    pub first_run_ms: u32,
    /// Times this task has been switched to.
    pub run_count: u64,
    /// Attached pty slot, if any.
    pub tty: Option<usize>,
}

impl Task {
    fn validate_for_switch(&self) {
        if self.magic != TASK_MAGIC {
            panic!("task {} ('{}'): corrupt magic", self.id, self.name);
        }
        if let Some(stack) = &self.stack {
            if !stack.guard_intact() {
                panic!("task {} ('{}'): stack guard overwritten", self.id, self.name);
            }
            if !stack.canary_intact() {
                panic!("task {} ('{}'): stack canary destroyed", self.id, self.name);
            }
            let sp = self.saved_sp;
            // The canary word itself is off-limits.
            if sp <= stack.canary_addr() || sp > stack.top() {
                panic!(
                    "task {} ('{}'): saved sp {:#x} outside stack [{:#x}, {:#x}]",
                    self.id,
                    self.name,
                    sp,
                    stack.usable_bottom(),
                    stack.top()
                );
            }
        }
    }

    fn runnable(&self) -> bool {
        matches!(self.state, BlockState::Ready | BlockState::Running)
    }
}

/// Read-only view for `ps` and the service manager.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub state: BlockState,
    pub parent: TaskId,
    pub run_count: u64,
    pub first_run_ms: u32,
}

/// Scheduler state: the arena plus the round-robin ring.
pub struct Scheduler {
    tasks: BTreeMap<TaskId, Box<Task>>,
    /// Round-robin order; treated as circular.
    ring: Vec<TaskId>,
    current: TaskId,
    next_id: TaskId,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            ring: Vec::new(),
            current: 0,
            next_id: 1,
        }
    }

    /// Install the boot task (id 0). It runs on the boot stack, is
    /// always runnable, and is never reaped; it doubles as the idle
    /// loop, so the ring is never without a runnable member.
    pub fn init_boot_task(&mut self) {
        let boot = Box::new(Task {
            magic: TASK_MAGIC,
            id: 0,
            name: String::from("boot"),
            entry: (|_| {}, 0),
            stack: None,
            saved_sp: 0,
            state: BlockState::Running,
            parent: 0,
            first_run_ms: 0,
            run_count: 1,
            tty: None,
        });
        self.tasks.insert(0, boot);
        self.ring.push(0);
        self.current = 0;
    }

    pub fn create(
        &mut self,
        entry: EntryFn,
        arg: usize,
        name: &str,
        stack_kb: usize,
    ) -> Result<TaskId, SchedError> {
        let usable = stack_kb.max(4) * 1024;
        let stack = TaskStack::new(usable).ok_or(SchedError::OutOfMemory)?;
        let saved_sp = arch::init_task_context(stack.top(), task_trampoline);

        let id = self.next_id;
        self.next_id += 1;

        let task = Box::new(Task {
            magic: TASK_MAGIC,
            id,
            name: String::from(name),
            entry: (entry, arg),
            stack: Some(stack),
            saved_sp,
            state: BlockState::Ready,
            parent: self.current,
            first_run_ms: 0,
            run_count: 0,
            tty: None,
        });
        self.tasks.insert(id, task);

        // Link after the current ring position.
        let pos = self
            .ring
            .iter()
            .position(|&t| t == self.current)
            .map(|p| p + 1)
            .unwrap_or(self.ring.len());
        self.ring.insert(pos, id);
        Ok(id)
    }

    /// Mark `id` and every transitive descendant zombie.
    pub fn kill(&mut self, id: TaskId) -> Result<(), SchedError> {
        if !self.tasks.contains_key(&id) {
            return Err(SchedError::NotFound);
        }
        let mut doomed: Vec<TaskId> = Vec::new();
        doomed.push(id);
        // Fixpoint over the parent links; the cascade has no depth bound.
        loop {
            let mut grew = false;
            for task in self.tasks.values() {
                if doomed.contains(&task.parent)
                    && !doomed.contains(&task.id)
                    && task.id != 0
                {
                    doomed.push(task.id);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }
        for t in doomed {
            // The boot task is the idle loop; it can never die.
            if t == 0 {
                continue;
            }
            if let Some(task) = self.tasks.get_mut(&t) {
                task.state = BlockState::Zombie;
            }
        }
        Ok(())
    }

    /// Drop every zombie except the current task. Frees stack and
    /// descriptor.
    pub fn reap(&mut self) {
        let current = self.current;
        let dead: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.state == BlockState::Zombie && t.id != current && t.id != 0)
            .map(|t| t.id)
            .collect();
        for id in dead {
            self.tasks.remove(&id);
            self.ring.retain(|&t| t != id);
        }
    }

    /// Next runnable task after the current ring position, round-robin
    /// with insertion-order tie-break. `None` when nothing (other than
    /// possibly the current task) can run.
    pub fn pick_next(&self) -> Option<TaskId> {
        if self.ring.is_empty() {
            return None;
        }
        let start = self
            .ring
            .iter()
            .position(|&t| t == self.current)
            .unwrap_or(0);
        for step in 1..=self.ring.len() {
            let id = self.ring[(start + step) % self.ring.len()];
            if let Some(task) = self.tasks.get(&id) {
                if task.runnable() {
                    return Some(id);
                }
            }
        }
        None
    }

    /// Wake every timed waiter whose deadline has passed. Signed
    /// comparison so the 32-bit clock may wrap.
    pub fn wake_timed(&mut self, now_ms: u32) {
        for task in self.tasks.values_mut() {
            if let BlockState::TimedWait(wake_ms) = task.state {
                if now_ms.wrapping_sub(wake_ms) as i32 >= 0 {
                    task.state = BlockState::Ready;
                }
            }
        }
    }

    /// Wake every waiter parked on `key`; returns how many woke.
    pub fn wake_event(&mut self, key: u64) -> usize {
        let mut woken = 0;
        for task in self.tasks.values_mut() {
            if task.state == BlockState::EventWait(key) {
                task.state = BlockState::Ready;
                woken += 1;
            }
        }
        woken
    }

    pub fn set_parent(&mut self, id: TaskId, parent: TaskId) -> Result<(), SchedError> {
        if !self.tasks.contains_key(&parent) {
            return Err(SchedError::NotFound);
        }
        match self.tasks.get_mut(&id) {
            Some(task) => {
                task.parent = parent;
                Ok(())
            }
            None => Err(SchedError::NotFound),
        }
    }

    pub fn current(&self) -> TaskId {
        self.current
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id).map(|b| &**b)
    }

    pub fn snapshot(&self) -> Vec<TaskInfo> {
        self.tasks
            .values()
            .map(|t| TaskInfo {
                id: t.id,
                name: t.name.clone(),
                state: t.state,
                parent: t.parent,
                run_count: t.run_count,
                first_run_ms: t.first_run_ms,
            })
            .collect()
    }

    /// Stage a switch: validate the target and return the raw pointers
    /// the context switch needs. The caller drops the lock first.
    fn stage_switch(&mut self, next: TaskId, now_ms: u32) -> (*mut usize, usize) {
        if let Some(old) = self.tasks.get_mut(&self.current) {
            if old.state == BlockState::Running {
                old.state = BlockState::Ready;
            }
        }
        let old_sp_ptr = match self.tasks.get_mut(&self.current) {
            Some(old) => &mut old.saved_sp as *mut usize,
            None => core::ptr::null_mut(),
        };

        let target = self.tasks.get_mut(&next).expect("staged switch to missing task");
        target.validate_for_switch();
        target.state = BlockState::Running;
        if target.run_count == 0 {
            target.first_run_ms = now_ms;
        }
        target.run_count += 1;
        let new_sp = target.saved_sp;
        self.current = next;
        (old_sp_ptr, new_sp)
    }
}

// =============================================================================
// Global scheduler
// =============================================================================

static SCHED: SpinLock<Scheduler> = SpinLock::new(Scheduler::new());

/// True once `init()` has run; preemption is ignored before that.
static STARTED: AtomicBool = AtomicBool::new(false);

/// Install the boot task and open for business.
pub fn init() {
    SCHED.lock().init_boot_task();
    STARTED.store(true, Ordering::Release);
}

/// Create a task; returns its id, or OOM if stack allocation failed.
pub fn create(entry: EntryFn, arg: usize, name: &str, stack_kb: usize) -> Result<TaskId, SchedError> {
    SCHED.lock().create(entry, arg, name, stack_kb)
}

/// Zombie-mark `id` and all descendants; reschedules if it was the
/// calling task. Idempotent on already-dead tasks.
pub fn kill(id: TaskId) -> Result<(), SchedError> {
    let was_current = {
        let mut sched = SCHED.lock();
        sched.kill(id)?;
        sched.current() == id
    };
    if was_current {
        schedule();
    }
    Ok(())
}

/// Terminate the calling task.
pub fn exit() -> ! {
    {
        let mut sched = SCHED.lock();
        let current = sched.current();
        let _ = sched.kill(current);
    }
    loop {
        schedule();
    }
}

/// Voluntarily give up the CPU.
pub fn yield_now() {
    schedule();
}

/// Block the calling task until the clock reaches `wake_ms`.
pub fn block_until(wake_ms: u32) {
    {
        let mut sched = SCHED.lock();
        let current = sched.current();
        if let Some(task) = sched.tasks.get_mut(&current) {
            if current != 0 {
                task.state = BlockState::TimedWait(wake_ms);
            }
        }
    }
    schedule();
}

/// Park the calling task on `key` until someone calls [`wake_event`].
pub fn wait_event(key: u64) {
    {
        let mut sched = SCHED.lock();
        let current = sched.current();
        if let Some(task) = sched.tasks.get_mut(&current) {
            if current != 0 {
                task.state = BlockState::EventWait(key);
            }
        }
    }
    schedule();
}

/// Wake every task parked on `key`.
pub fn wake_event(key: u64) -> usize {
    SCHED.lock().wake_event(key)
}

/// Timer-driven wake of timed sleepers; called by the clock.
pub fn wake_timed(now_ms: u32) {
    if !STARTED.load(Ordering::Acquire) {
        return;
    }
    SCHED.lock().wake_timed(now_ms);
}

/// Reassign a task's parent; used to detach children from short-lived
/// launchers.
pub fn set_parent(id: TaskId, parent: TaskId) -> Result<(), SchedError> {
    SCHED.lock().set_parent(id, parent)
}

pub fn current() -> TaskId {
    SCHED.lock().current()
}

/// Attach a pty slot to the calling task.
pub fn set_current_tty(tty: Option<usize>) {
    let mut sched = SCHED.lock();
    let current = sched.current();
    if let Some(task) = sched.tasks.get_mut(&current) {
        task.tty = tty;
    }
}

pub fn current_tty() -> Option<usize> {
    let sched = SCHED.lock();
    sched.get(sched.current()).and_then(|t| t.tty)
}

pub fn task_state(id: TaskId) -> Option<BlockState> {
    SCHED.lock().get(id).map(|t| t.state)
}

pub fn snapshot() -> Vec<TaskInfo> {
    SCHED.lock().snapshot()
}

/// The dispatcher. Reap, advance the clock, poll legacy devices, then
/// switch to the next runnable task if it differs from the caller.
pub fn schedule() {
    if !STARTED.load(Ordering::Acquire) {
        return;
    }
    let irq_was_enabled = cpu::irq_save();

    // Reap with the lock held, but tick/poll without it: both call
    // back into the scheduler.
    SCHED.lock().reap();
    crate::task::clock::poll_and_advance();
    crate::traps::poll_devices();

    let now = crate::task::clock::now_ms();
    let staged = {
        let mut sched = SCHED.lock();
        match sched.pick_next() {
            Some(next) if next != sched.current() => Some(sched.stage_switch(next, now)),
            _ => None,
        }
    };

    if let Some((old_sp_ptr, new_sp)) = staged {
        // SAFETY: both pointers were validated under the lock; boxes in
        // the arena are stable and the old task is only reaped once it
        // is no longer current. IRQs are masked.
        unsafe {
            arch::context_switch(old_sp_ptr, new_sp);
        }
    }

    cpu::irq_restore(irq_was_enabled);
}

/// Exception-return hook: reschedule if an interrupt asked for it.
pub fn preempt_if_pending() {
    if !STARTED.load(Ordering::Acquire) {
        return;
    }
    if crate::traps::take_preempt() {
        schedule();
    }
}

/// First code of every new task: run the entry, then exit. Reached by
/// the first context switch "returning" into it.
extern "C" fn task_trampoline() -> ! {
    let (entry, arg) = {
        let sched = SCHED.lock();
        sched
            .get(sched.current())
            .map(|t| t.entry)
            .expect("trampoline with no current task")
    };
    // The switch into a fresh task left IRQs masked.
    cpu::irq_enable();
    entry(arg);
    exit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: usize) {}

    fn fresh() -> Scheduler {
        let mut s = Scheduler::new();
        s.init_boot_task();
        s
    }

    #[test]
    fn create_links_after_current_and_assigns_ids() {
        let mut s = fresh();
        let a = s.create(noop, 0, "a", 8).unwrap();
        let b = s.create(noop, 0, "b", 8).unwrap();
        assert!(a > 0 && b > a);
        // Both link right after the boot task; the most recent sits first.
        assert_eq!(s.ring, vec![0, b, a]);
    }

    #[test]
    fn round_robin_skips_blocked_tasks() {
        let mut s = fresh();
        let a = s.create(noop, 0, "a", 8).unwrap();
        let b = s.create(noop, 0, "b", 8).unwrap();
        s.tasks.get_mut(&b).unwrap().state = BlockState::TimedWait(1000);
        assert_eq!(s.pick_next(), Some(a));
        s.tasks.get_mut(&a).unwrap().state = BlockState::EventWait(7);
        // Only the boot task remains runnable.
        assert_eq!(s.pick_next(), Some(0));
    }

    #[test]
    fn exactly_one_task_runs_after_staging() {
        let mut s = fresh();
        let a = s.create(noop, 0, "a", 8).unwrap();
        let next = s.pick_next().unwrap();
        assert_eq!(next, a);
        s.stage_switch(next, 5);
        let running: Vec<_> = s
            .tasks
            .values()
            .filter(|t| t.state == BlockState::Running)
            .map(|t| t.id)
            .collect();
        assert_eq!(running, vec![a]);
        assert_eq!(s.current(), a);
        assert_eq!(s.get(a).unwrap().first_run_ms, 5);
        assert_eq!(s.get(a).unwrap().run_count, 1);
    }

    #[test]
    fn kill_cascades_to_descendants() {
        let mut s = fresh();
        let p = s.create(noop, 0, "parent", 8).unwrap();
        let c = s.create(noop, 0, "child", 8).unwrap();
        let g = s.create(noop, 0, "grandchild", 8).unwrap();
        s.set_parent(c, p).unwrap();
        s.set_parent(g, c).unwrap();

        s.kill(p).unwrap();
        for id in [p, c, g] {
            assert_eq!(s.get(id).unwrap().state, BlockState::Zombie);
        }
        // One reap round removes all three; none is current.
        s.reap();
        for id in [p, c, g] {
            assert!(s.get(id).is_none());
            assert!(!s.ring.contains(&id));
        }
    }

    #[test]
    fn kill_unknown_task_is_not_found() {
        let mut s = fresh();
        assert_eq!(s.kill(99), Err(SchedError::NotFound));
    }

    #[test]
    fn reap_spares_the_current_zombie_and_the_boot_task() {
        let mut s = fresh();
        let a = s.create(noop, 0, "a", 8).unwrap();
        s.stage_switch(a, 0);
        s.kill(a).unwrap();
        s.reap();
        // Still current, so still present.
        assert!(s.get(a).is_some());
        // Once something else is current it goes away.
        s.stage_switch(0, 1);
        s.reap();
        assert!(s.get(a).is_none());
        assert!(s.get(0).is_some());
    }

    #[test]
    fn zombies_never_reappear_as_runnable() {
        let mut s = fresh();
        let a = s.create(noop, 0, "a", 8).unwrap();
        s.kill(a).unwrap();
        s.wake_timed(u32::MAX);
        s.wake_event(0);
        assert_eq!(s.get(a).unwrap().state, BlockState::Zombie);
        assert_eq!(s.pick_next(), Some(0));
    }

    #[test]
    fn timed_wake_uses_wrapping_comparison() {
        let mut s = fresh();
        let a = s.create(noop, 0, "a", 8).unwrap();
        // Deadline just before the 32-bit wrap; "now" just after it.
        s.tasks.get_mut(&a).unwrap().state = BlockState::TimedWait(u32::MAX - 5);
        s.wake_timed(2);
        assert_eq!(s.get(a).unwrap().state, BlockState::Ready);
    }

    #[test]
    fn event_wake_only_hits_matching_keys() {
        let mut s = fresh();
        let a = s.create(noop, 0, "a", 8).unwrap();
        let b = s.create(noop, 0, "b", 8).unwrap();
        s.tasks.get_mut(&a).unwrap().state = BlockState::EventWait(1);
        s.tasks.get_mut(&b).unwrap().state = BlockState::EventWait(2);
        assert_eq!(s.wake_event(1), 1);
        assert_eq!(s.get(a).unwrap().state, BlockState::Ready);
        assert_eq!(s.get(b).unwrap().state, BlockState::EventWait(2));
    }

    #[test]
    fn stack_guard_and_canary_survive_creation() {
        let mut s = fresh();
        let a = s.create(noop, 0, "a", 16).unwrap();
        let task = s.get(a).unwrap();
        let stack = task.stack.as_ref().unwrap();
        assert!(stack.guard_intact());
        assert!(stack.canary_intact());
        assert!(task.saved_sp > stack.canary_addr());
        assert!(task.saved_sp <= stack.top());
    }

    #[test]
    #[should_panic(expected = "stack canary")]
    fn canary_corruption_is_fatal() {
        let mut s = fresh();
        let a = s.create(noop, 0, "a", 8).unwrap();
        let addr = {
            let stack = s.get(a).unwrap().stack.as_ref().unwrap();
            stack.canary_addr()
        };
        unsafe {
            (addr as *mut u64).write(0);
        }
        s.stage_switch(a, 0);
    }

    #[test]
    fn set_parent_requires_both_tasks() {
        let mut s = fresh();
        let a = s.create(noop, 0, "a", 8).unwrap();
        assert_eq!(s.set_parent(a, 42), Err(SchedError::NotFound));
        assert_eq!(s.set_parent(42, 0), Err(SchedError::NotFound));
        assert!(s.set_parent(a, 0).is_ok());
        assert_eq!(s.get(a).unwrap().parent, 0);
    }
}
