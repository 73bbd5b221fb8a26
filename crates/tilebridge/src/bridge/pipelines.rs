use super::Bridge;
use crate::backend::{Backend, DeviceLimits, NativeError};
use crate::error::{BridgeError, Result};
use crate::format::RenderPipelineDescriptor;
use crate::handle::{ComputePipelineHandle, DeviceHandle, FunctionHandle, LibraryHandle, ObjectKey, RenderPipelineHandle};
use crate::object::{ComputePipelineState, DeviceState, FunctionState, LibraryState, RenderPipelineState};
use crate::shader::{BindingLayout, EntryPoint, ShaderLibrary, ShaderStage};
use std::sync::Arc;

/// Validates a pipeline's slots against the slot convention and the table size
fn link_layout(layout: &BindingLayout, limits: &DeviceLimits) -> Result<()> {
    layout.check_convention().map_err(BridgeError::LinkFailure)?;
    if let Some(slot) = layout.buffer_slots().find(|slot| *slot >= limits.max_buffer_slots) {
        return Err(BridgeError::LinkFailure(format!("buffer slot {slot} exceeds the {} available", limits.max_buffer_slots)));
    }
    if let Some(slot) = layout.texture_slots().find(|slot| *slot >= limits.max_texture_slots) {
        return Err(BridgeError::LinkFailure(format!("texture slot {slot} exceeds the {} available", limits.max_texture_slots)));
    }
    Ok(())
}

fn link_error(error: NativeError) -> BridgeError {
    match error {
        NativeError::Rejected(message) => BridgeError::LinkFailure(message),
        other => other.into(),
    }
}

impl<B: Backend> Bridge<B> {
    /// Compiles shader source into a library
    ///
    /// # Returns
    /// The library, or [`BridgeError::CompileFailure`] carrying the compiler's
    /// line/column annotated diagnostic
    pub fn create_library_from_source(&mut self, device: DeviceHandle, source: &str) -> Result<LibraryHandle> {
        let (key, _) = self.registry.get::<DeviceState<B>>(device)?;
        let state = self.live_device(key)?;

        let library = ShaderLibrary::compile(source).map_err(BridgeError::CompileFailure)?;
        let module = self.backend.create_shader_module(&state.native, source).map_err(|error| match error {
            NativeError::Rejected(message) => BridgeError::CompileFailure(message),
            other => other.into(),
        })?;

        tracing::debug!(functions = ?library.function_names(), "library compiled");
        let (handle, _) = self.registry.insert(
            Some(key),
            LibraryState {
                module,
                library: Arc::new(library),
                device: key,
            },
        );
        Ok(handle)
    }

    /// Entry point names of a library, in declaration order
    pub fn library_function_names(&self, library: LibraryHandle) -> Result<Vec<String>> {
        Ok(self.registry.get::<LibraryState<B>>(library)?.1.library.function_names())
    }

    /// Looks up an entry point by name
    pub fn create_function(&mut self, library: LibraryHandle, name: &str) -> Result<FunctionHandle> {
        let (key, state) = self.registry.get::<LibraryState<B>>(library)?;
        self.live_device(state.device)?;
        let entry = state.library.entry_point(name).ok_or_else(|| BridgeError::SymbolNotFound(name.to_string()))?.clone();
        let function = FunctionState {
            module: state.module.clone(),
            entry,
            device: state.device,
        };
        let (handle, _) = self.registry.insert(Some(key), function);
        Ok(handle)
    }

    /// Reflection of a function: stage, workgroup size and the slots it reads
    pub fn function_entry_point(&self, function: FunctionHandle) -> Result<&EntryPoint> {
        Ok(&self.registry.get::<FunctionState<B>>(function)?.1.entry)
    }

    /// Releases a library and the functions extracted from it
    pub fn release_library(&mut self, library: LibraryHandle) -> Result<()> {
        self.registry.release::<LibraryState<B>>(library)?;
        Ok(())
    }

    pub fn release_function(&mut self, function: FunctionHandle) -> Result<()> {
        self.registry.release::<FunctionState<B>>(function)?;
        Ok(())
    }

    /// Resolves a function and checks it belongs to `device`
    fn function_on(&self, device: ObjectKey, function: FunctionHandle, stage: ShaderStage) -> Result<&FunctionState<B>> {
        let (_, state) = self.registry.get::<FunctionState<B>>(function)?;
        if state.device != device {
            return Err(BridgeError::argument("function belongs to another device"));
        }
        if state.entry.stage != stage {
            return Err(BridgeError::argument(format!(
                "`{}` is a {:?} entry point, expected {stage:?}",
                state.entry.name, state.entry.stage
            )));
        }
        Ok(state)
    }

    /// Links a compute pipeline; the pipeline stays valid after its library is released
    pub fn create_compute_pipeline(&mut self, device: DeviceHandle, function: FunctionHandle) -> Result<ComputePipelineHandle> {
        let (key, _) = self.registry.get::<DeviceState<B>>(device)?;
        let device_state = self.live_device(key)?;
        let function = self.function_on(key, function, ShaderStage::Compute)?;

        let layout = BindingLayout::merge([function.entry.as_ref()]);
        link_layout(&layout, &device_state.limits)?;
        let native = self
            .backend
            .create_compute_pipeline(&device_state.native, &function.module, &function.entry, &layout)
            .map_err(link_error)?;

        tracing::debug!(entry = %function.entry.name, ?layout, "compute pipeline linked");
        let (handle, _) = self.registry.insert(
            Some(key),
            ComputePipelineState {
                native,
                layout: Arc::new(layout),
                device: key,
            },
        );
        Ok(handle)
    }

    /// Links a render pipeline from a vertex and a fragment function
    pub fn create_render_pipeline(
        &mut self,
        device: DeviceHandle,
        vertex: FunctionHandle,
        fragment: FunctionHandle,
        descriptor: &RenderPipelineDescriptor,
    ) -> Result<RenderPipelineHandle> {
        let (key, _) = self.registry.get::<DeviceState<B>>(device)?;
        let device_state = self.live_device(key)?;
        let vertex = self.function_on(key, vertex, ShaderStage::Vertex)?;
        let fragment = self.function_on(key, fragment, ShaderStage::Fragment)?;

        let layout = BindingLayout::merge([vertex.entry.as_ref(), fragment.entry.as_ref()]);
        link_layout(&layout, &device_state.limits)?;
        let native = self
            .backend
            .create_render_pipeline(
                &device_state.native,
                (&vertex.module, &vertex.entry),
                (&fragment.module, &fragment.entry),
                &layout,
                descriptor,
            )
            .map_err(link_error)?;

        tracing::debug!(vertex = %vertex.entry.name, fragment = %fragment.entry.name, ?descriptor, "render pipeline linked");
        let (handle, _) = self.registry.insert(
            Some(key),
            RenderPipelineState {
                native,
                layout: Arc::new(layout),
                descriptor: *descriptor,
                device: key,
            },
        );
        Ok(handle)
    }

    /// Slots a compute pipeline reads
    pub fn compute_pipeline_layout(&self, pipeline: ComputePipelineHandle) -> Result<&BindingLayout> {
        Ok(&self.registry.get::<ComputePipelineState<B>>(pipeline)?.1.layout)
    }

    /// Slots a render pipeline reads, across both stages
    pub fn render_pipeline_layout(&self, pipeline: RenderPipelineHandle) -> Result<&BindingLayout> {
        Ok(&self.registry.get::<RenderPipelineState<B>>(pipeline)?.1.layout)
    }

    pub fn release_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) -> Result<()> {
        self.registry.release::<ComputePipelineState<B>>(pipeline)?;
        Ok(())
    }

    pub fn release_render_pipeline(&mut self, pipeline: RenderPipelineHandle) -> Result<()> {
        self.registry.release::<RenderPipelineState<B>>(pipeline)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::error::ErrorKind;
    use crate::format::{BlendState, PixelFormat};

    #[test]
    fn test_library_functions_and_pipeline() {
        let (mut bridge, device, _) = testing::bridge();
        let library = bridge.create_library_from_source(device, testing::ADD_ONE).unwrap();
        assert_eq!(bridge.library_function_names(library).unwrap(), vec!["add_one".to_string()]);

        let function = bridge.create_function(library, "add_one").unwrap();
        assert_eq!(bridge.function_entry_point(function).unwrap().workgroup_size, [16, 1, 1]);
        assert_eq!(bridge.create_function(library, "missing").unwrap_err().kind(), ErrorKind::SymbolNotFound);

        let pipeline = bridge.create_compute_pipeline(device, function).unwrap();
        assert_eq!(bridge.compute_pipeline_layout(pipeline).unwrap().buffer_slots().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_bad_source_reports_diagnostic() {
        let (mut bridge, device, _) = testing::bridge();
        let err = bridge.create_library_from_source(device, "fn broken( {").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CompileFailure);
        assert!(!err.diagnostic().unwrap().is_empty());
        assert_eq!(bridge.live_handles(), 2);
    }

    #[test]
    fn test_library_release_keeps_pipelines() {
        let (mut bridge, device, _) = testing::bridge();
        let library = bridge.create_library_from_source(device, testing::ADD_ONE).unwrap();
        let function = bridge.create_function(library, "add_one").unwrap();
        let pipeline = bridge.create_compute_pipeline(device, function).unwrap();

        bridge.release_library(library).unwrap();
        assert_eq!(bridge.function_entry_point(function).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(bridge.create_compute_pipeline(device, function).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert!(bridge.compute_pipeline_layout(pipeline).is_ok());
    }

    #[test]
    fn test_stage_mismatch_is_invalid_argument() {
        let (mut bridge, device, _) = testing::bridge();
        let library = bridge.create_library_from_source(device, testing::QUAD).unwrap();
        let vertex = bridge.create_function(library, "vs").unwrap();
        let fragment = bridge.create_function(library, "fs").unwrap();

        assert_eq!(bridge.create_compute_pipeline(device, vertex).unwrap_err().kind(), ErrorKind::InvalidArgument);
        let descriptor = RenderPipelineDescriptor::new(PixelFormat::Rgba8Unorm);
        assert_eq!(
            bridge.create_render_pipeline(device, fragment, vertex, &descriptor).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );

        let blended = descriptor.with_blend(BlendState::ALPHA_BLENDING);
        let pipeline = bridge.create_render_pipeline(device, vertex, fragment, &blended).unwrap();
        assert_eq!(bridge.render_pipeline_layout(pipeline).unwrap().buffer_slots().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_slot_convention_violation_is_link_failure() {
        let (mut bridge, device, _) = testing::bridge();
        let source = r#"
@group(3) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(1)
fn main() {
    data[0] = 1u;
}
"#;
        let library = bridge.create_library_from_source(device, source).unwrap();
        let function = bridge.create_function(library, "main").unwrap();
        assert_eq!(bridge.create_compute_pipeline(device, function).unwrap_err().kind(), ErrorKind::LinkFailure);

        let high_slot = "@group(0) @binding(40) var<storage, read_write> data: array<u32>;\n@compute @workgroup_size(1)\nfn main() {\n    data[0] = 1u;\n}\n";
        let library = bridge.create_library_from_source(device, high_slot).unwrap();
        let function = bridge.create_function(library, "main").unwrap();
        assert_eq!(bridge.create_compute_pipeline(device, function).unwrap_err().kind(), ErrorKind::LinkFailure);
    }
}
