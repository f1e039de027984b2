//! Headless backend
//!
//! Implements [`GpuBackend`] without a device. Buffers are plain byte
//! vectors, command buffers keep the list of commands recorded into them and
//! every submission is logged. Work completes on submission; fences can be
//! given a latency to exercise the polling paths. Misuse (recording into a
//! buffer that is not recording, writing past a buffer's end, unknown
//! handles) is collected as violations rather than panicking inside worker
//! threads.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::render::api::{
    BufferHandle, BufferUsage, ClearValue, CommandBufferHandle, CommandBufferLevel,
    CommandBufferUsage, DescriptorSetHandle, DeviceLimits, Extent2D, FenceHandle, FenceStatus,
    FramebufferHandle, GpuBackend, ImageHandle, IndexType, Inheritance, PassTarget,
    PipelineHandle, PipelineLayoutHandle, PipelineStages, RenderPassHandle, SamplerHandle,
    SemaphoreHandle, ShaderStages, ShadowTarget, Submission, SubpassContents,
};
use crate::render::{RenderError, RenderResult};

/// A command captured by the headless backend
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// `cmd_begin_render_pass`
    BeginRenderPass {
        /// Render pass
        render_pass: RenderPassHandle,
        /// Framebuffer
        framebuffer: FramebufferHandle,
        /// Render area
        extent: Extent2D,
        /// Clear values
        clear_values: Vec<ClearValue>,
        /// Inline or secondary
        contents: SubpassContents,
    },
    /// `cmd_end_render_pass`
    EndRenderPass,
    /// `cmd_set_viewport`
    SetViewport(Extent2D),
    /// `cmd_set_scissor`
    SetScissor(Extent2D),
    /// `cmd_set_depth_bias`
    SetDepthBias {
        /// Constant factor
        constant: f32,
        /// Clamp
        clamp: f32,
        /// Slope factor
        slope: f32,
    },
    /// `cmd_bind_pipeline`
    BindPipeline(PipelineHandle),
    /// `cmd_bind_descriptor_sets`
    BindDescriptorSets {
        /// Layout
        layout: PipelineLayoutHandle,
        /// First set index
        first_set: u32,
        /// Sets
        sets: Vec<DescriptorSetHandle>,
    },
    /// `cmd_bind_vertex_buffers`
    BindVertexBuffers {
        /// First binding
        first_binding: u32,
        /// Buffers
        buffers: Vec<BufferHandle>,
        /// Offsets
        offsets: Vec<u64>,
    },
    /// `cmd_bind_index_buffer`
    BindIndexBuffer {
        /// Buffer
        buffer: BufferHandle,
        /// Offset
        offset: u64,
        /// Element type
        index_type: IndexType,
    },
    /// `cmd_push_constants`
    PushConstants {
        /// Layout
        layout: PipelineLayoutHandle,
        /// Stages
        stages: ShaderStages,
        /// Byte offset
        offset: u32,
        /// Payload
        data: Vec<u8>,
    },
    /// `cmd_draw_indexed`
    DrawIndexed {
        /// Indices per instance
        index_count: u32,
        /// Instances
        instance_count: u32,
        /// First index
        first_index: u32,
        /// Vertex offset
        vertex_offset: i32,
        /// First instance
        first_instance: u32,
    },
    /// `cmd_draw`
    Draw {
        /// Vertices per instance
        vertex_count: u32,
        /// Instances
        instance_count: u32,
        /// First vertex
        first_vertex: u32,
        /// First instance
        first_instance: u32,
    },
    /// `cmd_update_buffer`
    UpdateBuffer {
        /// Target buffer
        buffer: BufferHandle,
        /// Byte offset
        offset: u64,
        /// Payload
        data: Vec<u8>,
    },
    /// `cmd_execute_commands`
    ExecuteCommands(Vec<CommandBufferHandle>),
}

/// A submission captured by the headless backend
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRecord {
    /// Submitted command buffers
    pub command_buffers: Vec<CommandBufferHandle>,
    /// Wait semaphores
    pub wait: Vec<(SemaphoreHandle, PipelineStages)>,
    /// Signal semaphores
    pub signal: Vec<SemaphoreHandle>,
    /// Fence
    pub fence: Option<FenceHandle>,
}

#[derive(Debug)]
struct CommandBufferState {
    pool: usize,
    level: CommandBufferLevel,
    recording: bool,
    usage: CommandBufferUsage,
    inheritance: Option<Inheritance>,
    commands: Vec<RecordedCommand>,
    times_recorded: u32,
}

#[derive(Debug, Default)]
struct FenceState {
    signaled: bool,
    polls_until_signaled: u32,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_id: u64,
    buffers: HashMap<u64, Vec<u8>>,
    command_buffers: HashMap<u64, CommandBufferState>,
    semaphores: HashSet<u64>,
    fences: HashMap<u64, FenceState>,
    shadow_targets: HashSet<u64>,
    submissions: Vec<SubmissionRecord>,
    violations: Vec<String>,
    command_buffers_allocated: usize,
    command_buffer_budget: Option<usize>,
    fence_latency: u32,
}

impl HeadlessState {
    fn next_handle(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&mut self, cmd: CommandBufferHandle, command: RecordedCommand) {
        match self.command_buffers.get_mut(&cmd.0) {
            Some(state) if state.recording => state.commands.push(command),
            Some(_) => self.violations.push(format!("{:?} recorded outside begin/end: {:?}", cmd, command)),
            None => self.violations.push(format!("{:?} is not a live command buffer", cmd)),
        }
    }
}

/// Device-less implementation of [`GpuBackend`]
#[derive(Debug)]
pub struct HeadlessBackend {
    state: Mutex<HeadlessState>,
    limits: DeviceLimits,
    command_pools: usize,
}

impl HeadlessBackend {
    /// Create a backend with `command_pools` pools and default limits
    pub fn new(command_pools: usize) -> Self {
        Self::with_limits(command_pools, DeviceLimits::default())
    }

    /// Create a backend reporting custom limits
    pub fn with_limits(command_pools: usize, limits: DeviceLimits) -> Self {
        Self {
            state: Mutex::new(HeadlessState::default()),
            limits,
            command_pools: command_pools.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of `wait_fence` calls that report `NotReady` after each submission
    pub fn set_fence_latency(&self, polls: u32) {
        self.state().fence_latency = polls;
    }

    /// Cap further command buffer allocations at `budget` buffers
    ///
    /// Requests past the cap come back short, as from a pool that ran dry.
    pub fn set_command_buffer_budget(&self, budget: Option<usize>) {
        self.state().command_buffer_budget = budget;
    }

    /// Commands recorded into `cmd` since it was last begun
    pub fn commands(&self, cmd: CommandBufferHandle) -> Vec<RecordedCommand> {
        self.state()
            .command_buffers
            .get(&cmd.0)
            .map(|state| state.commands.clone())
            .unwrap_or_default()
    }

    /// How many times `cmd` has been begun
    pub fn times_recorded(&self, cmd: CommandBufferHandle) -> u32 {
        self.state().command_buffers.get(&cmd.0).map_or(0, |state| state.times_recorded)
    }

    /// Level and inheritance `cmd` was last begun with
    pub fn inheritance(&self, cmd: CommandBufferHandle) -> Option<Inheritance> {
        self.state().command_buffers.get(&cmd.0).and_then(|state| state.inheritance)
    }

    /// Level of `cmd`
    pub fn level(&self, cmd: CommandBufferHandle) -> Option<CommandBufferLevel> {
        self.state().command_buffers.get(&cmd.0).map(|state| state.level)
    }

    /// Usage flags `cmd` was last begun with
    pub fn usage(&self, cmd: CommandBufferHandle) -> Option<CommandBufferUsage> {
        self.state().command_buffers.get(&cmd.0).map(|state| state.usage)
    }

    /// Pool `cmd` was allocated from
    pub fn pool_of(&self, cmd: CommandBufferHandle) -> Option<usize> {
        self.state().command_buffers.get(&cmd.0).map(|state| state.pool)
    }

    /// Current contents of a buffer
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state().buffers.get(&buffer.0).cloned()
    }

    /// All submissions so far
    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        self.state().submissions.clone()
    }

    /// Drain the submission log
    pub fn take_submissions(&self) -> Vec<SubmissionRecord> {
        std::mem::take(&mut self.state().submissions)
    }

    /// Misuse detected so far
    pub fn violations(&self) -> Vec<String> {
        self.state().violations.clone()
    }

    /// Command buffers currently allocated
    pub fn live_command_buffers(&self) -> usize {
        self.state().command_buffers.len()
    }

    /// Command buffers allocated over the backend's lifetime
    pub fn command_buffers_allocated(&self) -> usize {
        self.state().command_buffers_allocated
    }

    /// Live buffers
    pub fn live_buffers(&self) -> usize {
        self.state().buffers.len()
    }

    /// Live shadow targets
    pub fn live_shadow_targets(&self) -> usize {
        self.state().shadow_targets.len()
    }
}

impl GpuBackend for HeadlessBackend {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn command_pool_count(&self) -> usize {
        self.command_pools
    }

    fn create_buffer(&self, size: u64, usage: BufferUsage) -> RenderResult<BufferHandle> {
        let mut state = self.state();
        let id = state.next_handle();
        state.buffers.insert(id, vec![0; size as usize]);
        log::trace!("Headless buffer {} created ({} bytes, {:?})", id, size, usage);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let mut state = self.state();
        let contents = state
            .buffers
            .get_mut(&buffer.0)
            .ok_or(RenderError::InvalidHandle { kind: "buffer", id: buffer.0 })?;
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(RenderError::RenderingFailed(format!(
                "write of {} bytes at offset {} overflows buffer of {} bytes",
                data.len(), offset, contents.len()
            )));
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state();
        if state.buffers.remove(&buffer.0).is_none() {
            state.violations.push(format!("destroying unknown {:?}", buffer));
        }
    }

    fn create_shadow_target(&self, size: u32) -> RenderResult<ShadowTarget> {
        if size == 0 {
            return Err(RenderError::ResourceCreationFailed("shadow map size must be positive".to_string()));
        }
        let mut state = self.state();
        let image = state.next_handle();
        state.shadow_targets.insert(image);
        Ok(ShadowTarget {
            image: ImageHandle(image),
            sampler: SamplerHandle(state.next_handle()),
            render_pass: RenderPassHandle(state.next_handle()),
            framebuffer: FramebufferHandle(state.next_handle()),
            size,
        })
    }

    fn destroy_shadow_target(&self, target: &ShadowTarget) {
        self.state().shadow_targets.remove(&target.image.0);
    }

    fn create_semaphore(&self) -> RenderResult<SemaphoreHandle> {
        let mut state = self.state();
        let id = state.next_handle();
        state.semaphores.insert(id);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        self.state().semaphores.remove(&semaphore.0);
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<FenceHandle> {
        let mut state = self.state();
        let id = state.next_handle();
        state.fences.insert(id, FenceState { signaled, polls_until_signaled: 0 });
        Ok(FenceHandle(id))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        self.state().fences.remove(&fence.0);
    }

    fn wait_fence(&self, fence: FenceHandle, _timeout_ns: u64) -> RenderResult<FenceStatus> {
        let mut state = self.state();
        let fence_state = state
            .fences
            .get_mut(&fence.0)
            .ok_or(RenderError::InvalidHandle { kind: "fence", id: fence.0 })?;
        if fence_state.signaled {
            return Ok(FenceStatus::Signaled);
        }
        if fence_state.polls_until_signaled > 0 {
            fence_state.polls_until_signaled -= 1;
            if fence_state.polls_until_signaled == 0 {
                fence_state.signaled = true;
            }
        }
        Ok(FenceStatus::NotReady)
    }

    fn reset_fence(&self, fence: FenceHandle) -> RenderResult<()> {
        let mut state = self.state();
        let fence_state = state
            .fences
            .get_mut(&fence.0)
            .ok_or(RenderError::InvalidHandle { kind: "fence", id: fence.0 })?;
        fence_state.signaled = false;
        fence_state.polls_until_signaled = 0;
        Ok(())
    }

    fn allocate_command_buffers(
        &self,
        pool: usize,
        level: CommandBufferLevel,
        count: u32,
    ) -> RenderResult<Vec<CommandBufferHandle>> {
        if pool >= self.command_pools {
            return Err(RenderError::ResourceCreationFailed(format!(
                "command pool {} out of range ({} pools)",
                pool, self.command_pools
            )));
        }
        let mut state = self.state();
        let granted = match state.command_buffer_budget.as_mut() {
            Some(budget) => {
                let granted = (count as usize).min(*budget);
                *budget -= granted;
                granted
            }
            None => count as usize,
        };
        let handles: Vec<CommandBufferHandle> = (0..granted)
            .map(|_| {
                let id = state.next_handle();
                state.command_buffers.insert(id, CommandBufferState {
                    pool,
                    level,
                    recording: false,
                    usage: CommandBufferUsage::empty(),
                    inheritance: None,
                    commands: Vec::new(),
                    times_recorded: 0,
                });
                CommandBufferHandle(id)
            })
            .collect();
        state.command_buffers_allocated += granted;
        Ok(handles)
    }

    fn free_command_buffers(&self, pool: usize, buffers: &[CommandBufferHandle]) {
        let mut state = self.state();
        for cmd in buffers {
            match state.command_buffers.remove(&cmd.0) {
                Some(cb) if cb.pool != pool => state
                    .violations
                    .push(format!("{:?} freed to pool {} but allocated from pool {}", cmd, pool, cb.pool)),
                Some(_) => {}
                None => state.violations.push(format!("freeing unknown {:?}", cmd)),
            }
        }
    }

    fn begin_command_buffer(
        &self,
        cmd: CommandBufferHandle,
        usage: CommandBufferUsage,
        inheritance: Option<&Inheritance>,
    ) -> RenderResult<()> {
        let mut state = self.state();
        let cb = state
            .command_buffers
            .get_mut(&cmd.0)
            .ok_or(RenderError::InvalidHandle { kind: "command buffer", id: cmd.0 })?;
        if cb.recording {
            return Err(RenderError::RenderingFailed(format!("{:?} already recording", cmd)));
        }
        if cb.level == CommandBufferLevel::Secondary && inheritance.is_none() {
            return Err(RenderError::RenderingFailed(format!(
                "secondary {:?} begun without inheritance info",
                cmd
            )));
        }
        cb.recording = true;
        cb.usage = usage;
        cb.inheritance = inheritance.copied();
        cb.commands.clear();
        cb.times_recorded += 1;
        Ok(())
    }

    fn end_command_buffer(&self, cmd: CommandBufferHandle) -> RenderResult<()> {
        let mut state = self.state();
        let cb = state
            .command_buffers
            .get_mut(&cmd.0)
            .ok_or(RenderError::InvalidHandle { kind: "command buffer", id: cmd.0 })?;
        if !cb.recording {
            return Err(RenderError::RenderingFailed(format!("{:?} not recording", cmd)));
        }
        cb.recording = false;
        Ok(())
    }

    fn cmd_begin_render_pass(&self, cmd: CommandBufferHandle, target: &PassTarget, contents: SubpassContents) {
        self.state().record(cmd, RecordedCommand::BeginRenderPass {
            render_pass: target.render_pass,
            framebuffer: target.framebuffer,
            extent: target.extent,
            clear_values: target.clear_values.clone(),
            contents,
        });
    }

    fn cmd_end_render_pass(&self, cmd: CommandBufferHandle) {
        self.state().record(cmd, RecordedCommand::EndRenderPass);
    }

    fn cmd_set_viewport(&self, cmd: CommandBufferHandle, extent: Extent2D) {
        self.state().record(cmd, RecordedCommand::SetViewport(extent));
    }

    fn cmd_set_scissor(&self, cmd: CommandBufferHandle, extent: Extent2D) {
        self.state().record(cmd, RecordedCommand::SetScissor(extent));
    }

    fn cmd_set_depth_bias(&self, cmd: CommandBufferHandle, constant: f32, clamp: f32, slope: f32) {
        self.state().record(cmd, RecordedCommand::SetDepthBias { constant, clamp, slope });
    }

    fn cmd_bind_pipeline(&self, cmd: CommandBufferHandle, pipeline: PipelineHandle) {
        self.state().record(cmd, RecordedCommand::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_sets(
        &self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    ) {
        self.state().record(cmd, RecordedCommand::BindDescriptorSets {
            layout,
            first_set,
            sets: sets.to_vec(),
        });
    }

    fn cmd_bind_vertex_buffers(
        &self,
        cmd: CommandBufferHandle,
        first_binding: u32,
        buffers: &[BufferHandle],
        offsets: &[u64],
    ) {
        self.state().record(cmd, RecordedCommand::BindVertexBuffers {
            first_binding,
            buffers: buffers.to_vec(),
            offsets: offsets.to_vec(),
        });
    }

    fn cmd_bind_index_buffer(&self, cmd: CommandBufferHandle, buffer: BufferHandle, offset: u64, index_type: IndexType) {
        self.state().record(cmd, RecordedCommand::BindIndexBuffer { buffer, offset, index_type });
    }

    fn cmd_push_constants(
        &self,
        cmd: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        self.state().record(cmd, RecordedCommand::PushConstants {
            layout,
            stages,
            offset,
            data: data.to_vec(),
        });
    }

    fn cmd_draw_indexed(
        &self,
        cmd: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.state().record(cmd, RecordedCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
    }

    fn cmd_draw(&self, cmd: CommandBufferHandle, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.state().record(cmd, RecordedCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
    }

    fn cmd_update_buffer(&self, cmd: CommandBufferHandle, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let mut state = self.state();
        if data.len() % 4 != 0 || data.len() > crate::render::api::MAX_INLINE_UPDATE_SIZE {
            state.violations.push(format!("inline update of {} bytes is not allowed", data.len()));
        }
        state.record(cmd, RecordedCommand::UpdateBuffer { buffer, offset, data: data.to_vec() });
    }

    fn cmd_execute_commands(&self, cmd: CommandBufferHandle, secondaries: &[CommandBufferHandle]) {
        let mut state = self.state();
        for secondary in secondaries {
            let problem = match state.command_buffers.get(&secondary.0) {
                Some(cb) if cb.level != CommandBufferLevel::Secondary => Some("is not secondary"),
                Some(cb) if cb.recording => Some("is still recording"),
                Some(_) => None,
                None => Some("is not a live command buffer"),
            };
            if let Some(problem) = problem {
                state.violations.push(format!("executed {:?} {}", secondary, problem));
            }
        }
        state.record(cmd, RecordedCommand::ExecuteCommands(secondaries.to_vec()));
    }

    fn submit(&self, submission: &Submission<'_>) -> RenderResult<()> {
        let mut state = self.state();

        for cmd in submission.command_buffers {
            match state.command_buffers.get(&cmd.0) {
                Some(cb) if cb.recording => {
                    return Err(RenderError::RenderingFailed(format!("{:?} submitted while recording", cmd)));
                }
                Some(cb) if cb.level != CommandBufferLevel::Primary => {
                    return Err(RenderError::RenderingFailed(format!("{:?} is not a primary buffer", cmd)));
                }
                Some(_) => {}
                None => return Err(RenderError::InvalidHandle { kind: "command buffer", id: cmd.0 }),
            }
        }

        // Replay inline buffer updates so buffer contents mirror GPU memory
        let updates: Vec<(BufferHandle, u64, Vec<u8>)> = submission
            .command_buffers
            .iter()
            .filter_map(|cmd| state.command_buffers.get(&cmd.0))
            .flat_map(|cb| cb.commands.iter())
            .filter_map(|command| match command {
                RecordedCommand::UpdateBuffer { buffer, offset, data } => Some((*buffer, *offset, data.clone())),
                _ => None,
            })
            .collect();
        for (buffer, offset, data) in updates {
            if let Some(contents) = state.buffers.get_mut(&buffer.0) {
                let start = offset as usize;
                let end = (start + data.len()).min(contents.len());
                contents[start..end].copy_from_slice(&data[..end - start]);
            }
        }

        if let Some(fence) = submission.fence {
            let latency = state.fence_latency;
            let fence_state = state
                .fences
                .get_mut(&fence.0)
                .ok_or(RenderError::InvalidHandle { kind: "fence", id: fence.0 })?;
            if fence_state.signaled {
                return Err(RenderError::RenderingFailed(format!("{:?} submitted while signaled", fence)));
            }
            fence_state.signaled = latency == 0;
            fence_state.polls_until_signaled = latency;
        }

        state.submissions.push(SubmissionRecord {
            command_buffers: submission.command_buffers.to_vec(),
            wait: submission.wait.to_vec(),
            signal: submission.signal.to_vec(),
            fence: submission.fence,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_recorded_between_begin_and_end() {
        let backend = HeadlessBackend::new(1);
        let cmd = backend.allocate_command_buffers(0, CommandBufferLevel::Primary, 1).unwrap()[0];
        backend.begin_command_buffer(cmd, CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
        backend.cmd_draw(cmd, 3, 1, 0, 0);
        backend.end_command_buffer(cmd).unwrap();
        backend.cmd_draw(cmd, 3, 1, 0, 0);

        assert_eq!(backend.commands(cmd).len(), 1);
        assert_eq!(backend.violations().len(), 1);
    }

    #[test]
    fn test_fence_latency_reports_not_ready() {
        let backend = HeadlessBackend::new(1);
        backend.set_fence_latency(2);
        let fence = backend.create_fence(false).unwrap();
        backend.submit(&Submission { fence: Some(fence), ..Default::default() }).unwrap();

        assert_eq!(backend.wait_fence(fence, 0).unwrap(), FenceStatus::NotReady);
        assert_eq!(backend.wait_fence(fence, 0).unwrap(), FenceStatus::NotReady);
        assert_eq!(backend.wait_fence(fence, 0).unwrap(), FenceStatus::Signaled);
    }

    #[test]
    fn test_inline_updates_applied_on_submit() {
        let backend = HeadlessBackend::new(1);
        let buffer = backend.create_buffer(8, BufferUsage::UNIFORM | BufferUsage::TRANSFER_DST).unwrap();
        let cmd = backend.allocate_command_buffers(0, CommandBufferLevel::Primary, 1).unwrap()[0];
        backend.begin_command_buffer(cmd, CommandBufferUsage::ONE_TIME_SUBMIT, None).unwrap();
        backend.cmd_update_buffer(cmd, buffer, 4, &[1, 2, 3, 4]);
        backend.end_command_buffer(cmd).unwrap();
        assert_eq!(backend.buffer_contents(buffer).unwrap(), vec![0; 8]);

        backend.submit(&Submission { command_buffers: &[cmd], ..Default::default() }).unwrap();
        assert_eq!(backend.buffer_contents(buffer).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_write_past_end_is_rejected() {
        let backend = HeadlessBackend::new(1);
        let buffer = backend.create_buffer(4, BufferUsage::UNIFORM).unwrap();
        assert!(backend.write_buffer(buffer, 2, &[0; 4]).is_err());
        assert!(backend.write_buffer(buffer, 0, &[0; 4]).is_ok());
    }
}
