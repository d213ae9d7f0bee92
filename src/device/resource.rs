// Copyright @yucwang 2026

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytemuck::Pod;

use super::{DeviceApi, DevicePtr, ModuleHandle, PipelineHandle, ProgramGroupHandle, TextureObject, TraversableHandle};
use crate::core::error::Result;

/// One kind of device object and how to release it.
pub trait ResourceKind {
    type Raw: Copy + fmt::Debug;
    const NAME: &'static str;

    fn release(device: &dyn DeviceApi, raw: Self::Raw) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawBuffer {
    pub ptr: DevicePtr,
    pub size: usize,
}

pub struct BufferKind;
pub struct ModuleKind;
pub struct ProgramGroupKind;
pub struct PipelineKind;
pub struct TextureKind;
pub struct AccelKind;

impl ResourceKind for BufferKind {
    type Raw = RawBuffer;
    const NAME: &'static str = "buffer";

    fn release(device: &dyn DeviceApi, raw: RawBuffer) -> Result<()> {
        device.free(raw.ptr)
    }
}

impl ResourceKind for ModuleKind {
    type Raw = ModuleHandle;
    const NAME: &'static str = "module";

    fn release(device: &dyn DeviceApi, raw: ModuleHandle) -> Result<()> {
        device.destroy_module(raw)
    }
}

impl ResourceKind for ProgramGroupKind {
    type Raw = ProgramGroupHandle;
    const NAME: &'static str = "program group";

    fn release(device: &dyn DeviceApi, raw: ProgramGroupHandle) -> Result<()> {
        device.destroy_program_group(raw)
    }
}

impl ResourceKind for PipelineKind {
    type Raw = PipelineHandle;
    const NAME: &'static str = "pipeline";

    fn release(device: &dyn DeviceApi, raw: PipelineHandle) -> Result<()> {
        device.destroy_pipeline(raw)
    }
}

impl ResourceKind for TextureKind {
    type Raw = TextureObject;
    const NAME: &'static str = "texture";

    fn release(device: &dyn DeviceApi, raw: TextureObject) -> Result<()> {
        device.destroy_texture(raw)
    }
}

impl ResourceKind for AccelKind {
    type Raw = TraversableHandle;
    const NAME: &'static str = "acceleration structure";

    fn release(device: &dyn DeviceApi, raw: TraversableHandle) -> Result<()> {
        device.destroy_accel(raw)
    }
}

/// Owns one device object and releases it exactly once on drop.
/// Not `Clone`: ownership moves, `raw()` lends the handle.
pub struct DeviceResource<K: ResourceKind> {
    raw: K::Raw,
    device: Arc<dyn DeviceApi>,
    _kind: PhantomData<K>,
}

pub type Buffer = DeviceResource<BufferKind>;
pub type Module = DeviceResource<ModuleKind>;
pub type ProgramGroup = DeviceResource<ProgramGroupKind>;
pub type Pipeline = DeviceResource<PipelineKind>;
pub type Texture = DeviceResource<TextureKind>;
pub type Accel = DeviceResource<AccelKind>;

impl<K: ResourceKind> DeviceResource<K> {
    /// Takes ownership of an already-acquired handle.
    pub fn adopt(device: Arc<dyn DeviceApi>, raw: K::Raw) -> Self {
        Self { raw, device, _kind: PhantomData }
    }

    pub fn raw(&self) -> K::Raw {
        self.raw
    }
}

impl<K: ResourceKind> fmt::Debug for DeviceResource<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", K::NAME, self.raw)
    }
}

impl<K: ResourceKind> Drop for DeviceResource<K> {
    fn drop(&mut self) {
        if let Err(err) = K::release(self.device.as_ref(), self.raw) {
            // Device state is unknown past this point.
            log::error!("failed to release {} {:?}: {}", K::NAME, self.raw, err);
            std::process::abort();
        }
    }
}

impl Buffer {
    pub fn alloc(device: &Arc<dyn DeviceApi>, size: usize) -> Result<Buffer> {
        let ptr = device.alloc(size)?;
        Ok(Buffer::adopt(Arc::clone(device), RawBuffer { ptr, size }))
    }

    /// Allocates and queues an upload of `data`.
    pub fn from_slice<T: Pod>(device: &Arc<dyn DeviceApi>, data: &[T]) -> Result<Buffer> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = Buffer::alloc(device, bytes.len())?;
        buffer.upload(data)?;
        Ok(buffer)
    }

    pub fn ptr(&self) -> DevicePtr {
        self.raw.ptr
    }

    pub fn size(&self) -> usize {
        self.raw.size
    }

    pub fn upload<T: Pod>(&self, data: &[T]) -> Result<()> {
        self.device.copy_to_device_async(self.raw.ptr, bytemuck::cast_slice(data))
    }

    pub fn clear(&self) -> Result<()> {
        self.device.memset(self.raw.ptr, 0, self.raw.size)
    }

    pub fn download<T: Pod>(&self) -> Result<Vec<T>> {
        let mut bytes = vec![0u8; self.raw.size];
        self.device.copy_from_device(self.raw.ptr, &mut bytes)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }
}

/// The device context of one render invocation. Every resource created
/// through it must be dropped before it.
pub struct DeviceContext {
    device: Arc<dyn DeviceApi>,
}

impl DeviceContext {
    pub fn new(device: Arc<dyn DeviceApi>) -> Self {
        log::info!("device context created on {} device", device.name());
        Self { device }
    }

    pub fn device(&self) -> &Arc<dyn DeviceApi> {
        &self.device
    }

    pub fn raw(&self) -> &dyn DeviceApi {
        self.device.as_ref()
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if let Err(err) = self.device.destroy_context() {
            log::error!("failed to destroy device context: {}", err);
            std::process::abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDevice;

    #[test]
    fn test_resources_release_exactly_once() {
        let software = Arc::new(SoftwareDevice::with_threads(1));
        let device: Arc<dyn DeviceApi> = software.clone();
        {
            let context = DeviceContext::new(Arc::clone(&device));
            let a = Buffer::from_slice(context.device(), &[1.0f32, 2.0, 3.0]).unwrap();
            let b = Buffer::alloc(context.device(), 8).unwrap();
            assert_eq!(software.live_resources(), 2);
            assert_eq!(a.download::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);

            let moved = b;
            assert_eq!(moved.size(), 8);
            drop(a);
            assert_eq!(software.live_resources(), 1);
            drop(moved);
            assert_eq!(software.live_resources(), 0);
        }
        assert!(software.alloc(1).is_err());
    }

    #[test]
    fn test_clear_zeroes_buffer() {
        let device: Arc<dyn DeviceApi> = Arc::new(SoftwareDevice::with_threads(1));
        let buffer = Buffer::from_slice(&device, &[7u32, 7, 7]).unwrap();
        buffer.clear().unwrap();
        assert_eq!(buffer.download::<u32>().unwrap(), vec![0, 0, 0]);
        assert!(format!("{:?}", buffer).starts_with("buffer("));
    }
}
