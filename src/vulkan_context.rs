//! Vulkan initialization: instance, device, queue, allocator, command pool,
//! and the descriptor pool/layout shared by every bake pass.
//!
//! Headless only; nothing here touches a window system.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc};
use log::{debug, info, warn};
use std::ffi::CStr;
use std::sync::Mutex;

use crate::texture::HDR_FORMAT;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Everything a bake needs from the GPU.
///
/// Resources created against a context borrow it, so the borrow checker
/// keeps them from outliving the device. The allocator lives behind a
/// `Mutex` so resources can return their memory from `Drop` through `&self`.
pub struct GpuContext {
    allocator: Mutex<Option<Allocator>>,

    pub descriptor_pool: vk::DescriptorPool,
    /// Binding 0: combined image sampler, visible to vertex + fragment.
    pub bake_set_layout: vk::DescriptorSetLayout,

    pub command_pool: vk::CommandPool,
    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,
    pub physical_device: vk::PhysicalDevice,
    pub device: ash::Device,

    /// Whether the device can blend into `HDR_FORMAT` attachments.
    pub hdr_blend_supported: bool,

    debug_utils_loader: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,

    pub instance: ash::Instance,
    pub entry: ash::Entry,
}

impl GpuContext {
    /// Create a headless context on the first suitable GPU, preferring a
    /// discrete one.
    pub fn new() -> Result<Self, String> {
        // --- Entry ---
        let entry = unsafe {
            ash::Entry::load().map_err(|e| format!("Failed to load Vulkan: {}", e))?
        };

        // --- Instance ---
        let app_info = vk::ApplicationInfo::default()
            .application_name(c"envmap-baker")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"envmap-baker")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::make_api_version(0, 1, 2, 0));

        let mut layer_names: Vec<*const std::ffi::c_char> = Vec::new();
        let mut extension_names: Vec<*const std::ffi::c_char> = Vec::new();

        // Enable validation layers in debug builds
        let enable_validation = cfg!(debug_assertions);
        let mut has_validation = false;
        if enable_validation {
            let available_layers = unsafe {
                entry
                    .enumerate_instance_layer_properties()
                    .unwrap_or_default()
            };
            has_validation = available_layers.iter().any(|layer| {
                let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
                name == VALIDATION_LAYER
            });
            if has_validation {
                layer_names.push(VALIDATION_LAYER.as_ptr());
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
                info!("Validation layers enabled");
            } else {
                warn!("Validation layers requested but not available");
            }
        }

        let instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extension_names);

        let instance = unsafe {
            entry
                .create_instance(&instance_create_info, None)
                .map_err(|e| format!("Failed to create Vulkan instance: {:?}", e))?
        };
        let mut partial = PartialContext::new(instance.clone());

        // --- Debug messenger ---
        let (debug_utils_loader, debug_messenger) = if has_validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));

            let messenger = unsafe {
                loader
                    .create_debug_utils_messenger(&messenger_info, None)
                    .ok()
            };

            if let Some(messenger) = messenger {
                partial.debug_utils = Some((loader.clone(), messenger));
            }
            (Some(loader), messenger)
        } else {
            (None, None)
        };

        // --- Physical device selection ---
        let physical_devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(|e| format!("Failed to enumerate physical devices: {:?}", e))?
        };

        if physical_devices.is_empty() {
            return Err("No Vulkan-capable GPUs found".to_string());
        }

        let mut selected: Option<(vk::PhysicalDevice, u32, bool)> = None;

        for &phys_dev in &physical_devices {
            let props = unsafe { instance.get_physical_device_properties(phys_dev) };
            let api_version = props.api_version;

            if vk::api_version_major(api_version) < 1
                || (vk::api_version_major(api_version) == 1
                    && vk::api_version_minor(api_version) < 2)
            {
                continue;
            }

            let queue_families =
                unsafe { instance.get_physical_device_queue_family_properties(phys_dev) };
            let graphics_family = queue_families
                .iter()
                .position(|props| props.queue_flags.contains(vk::QueueFlags::GRAPHICS));

            let Some(family_idx) = graphics_family else {
                continue;
            };

            let is_discrete = props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
            let replace = match selected {
                None => true,
                Some((_, _, selected_discrete)) => is_discrete && !selected_discrete,
            };

            if replace {
                selected = Some((phys_dev, family_idx as u32, is_discrete));

                let dev_name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) };
                info!(
                    "Selected GPU: {} (Vulkan {}.{})",
                    dev_name.to_string_lossy(),
                    vk::api_version_major(api_version),
                    vk::api_version_minor(api_version),
                );
            }
        }

        let (physical_device, graphics_queue_family, _) = selected
            .ok_or("No suitable GPU found (need Vulkan 1.2+ with graphics queue)")?;

        // --- Format capabilities ---
        let format_props = unsafe {
            instance.get_physical_device_format_properties(physical_device, HDR_FORMAT)
        };
        let hdr_blend_supported = check_hdr_format(format_props.optimal_tiling_features)?;
        if !hdr_blend_supported {
            warn!("{:?} does not support blending; bake pipelines will write without blending", HDR_FORMAT);
        }

        // --- Device creation ---
        let queue_priority = [1.0f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priority);
        let queue_create_infos = [queue_create_info];

        let device_create_info =
            vk::DeviceCreateInfo::default().queue_create_infos(&queue_create_infos);

        let device = unsafe {
            instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| format!("Failed to create logical device: {:?}", e))?
        };
        partial.device = Some(device.clone());

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        // --- Command pool ---
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let command_pool = unsafe {
            device
                .create_command_pool(&pool_info, None)
                .map_err(|e| format!("Failed to create command pool: {:?}", e))?
        };
        partial.command_pool = command_pool;

        // --- Descriptor pool + bake layout ---
        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(16)];

        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(16)
            .pool_sizes(&pool_sizes);

        let descriptor_pool = unsafe {
            device
                .create_descriptor_pool(&descriptor_pool_info, None)
                .map_err(|e| format!("Failed to create descriptor pool: {:?}", e))?
        };
        partial.descriptor_pool = descriptor_pool;

        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)];

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        let bake_set_layout = unsafe {
            device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(|e| format!("Failed to create bake descriptor set layout: {:?}", e))?
        };
        partial.bake_set_layout = bake_set_layout;

        // --- gpu-allocator ---
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| format!("Failed to create GPU allocator: {:?}", e))?;

        partial.release();
        info!("Vulkan context initialized successfully");

        Ok(GpuContext {
            allocator: Mutex::new(Some(allocator)),
            descriptor_pool,
            bake_set_layout,
            command_pool,
            graphics_queue,
            graphics_queue_family,
            physical_device,
            device,
            hdr_blend_supported,
            debug_utils_loader,
            debug_messenger,
            instance,
            entry,
        })
    }

    /// Allocate device memory through the shared allocator.
    pub fn allocate(&self, desc: &AllocationCreateDesc) -> Result<Allocation, String> {
        let mut guard = self
            .allocator
            .lock()
            .map_err(|_| "GPU allocator lock poisoned".to_string())?;
        let allocator = guard.as_mut().ok_or("GPU allocator already destroyed")?;
        allocator
            .allocate(desc)
            .map_err(|e| format!("Failed to allocate memory for '{}': {:?}", desc.name, e))
    }

    /// Return an allocation to the shared allocator. Failures are logged.
    pub fn free(&self, allocation: Allocation) {
        let mut guard = self
            .allocator
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(allocator) = guard.as_mut() {
            if let Err(e) = allocator.free(allocation) {
                warn!("Failed to free GPU allocation: {:?}", e);
            }
        }
    }

    /// Allocate and begin a one-shot command buffer.
    pub fn begin_single_commands(&self) -> Result<vk::CommandBuffer, String> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(|e| format!("Failed to allocate command buffer: {:?}", e))?[0]
        };

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(|e| format!("Failed to begin command buffer: {:?}", e))?;
        }

        Ok(cmd)
    }

    /// End, submit, and wait for a one-shot command buffer.
    ///
    /// This is the only point where the host blocks on the GPU.
    pub fn end_single_commands(&self, cmd: vk::CommandBuffer) -> Result<(), String> {
        unsafe {
            self.device
                .end_command_buffer(cmd)
                .map_err(|e| format!("Failed to end command buffer: {:?}", e))?;
        }

        let cmd_bufs = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_bufs);

        let fence_info = vk::FenceCreateInfo::default();
        let fence = unsafe {
            self.device
                .create_fence(&fence_info, None)
                .map_err(|e| format!("Failed to create fence: {:?}", e))?
        };

        let result = unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], fence)
                .map_err(|e| format!("Failed to submit command buffer: {:?}", e))
                .and_then(|()| {
                    self.device
                        .wait_for_fences(&[fence], true, u64::MAX)
                        .map_err(|e| format!("Failed to wait for fence: {:?}", e))
                })
        };

        unsafe {
            self.device.destroy_fence(fence, None);
            self.device.free_command_buffers(self.command_pool, &[cmd]);
        }

        result
    }

    /// Block until the device has no work in flight.
    pub fn wait_idle(&self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                warn!("device_wait_idle failed: {:?}", e);
            }
        }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        self.wait_idle();

        unsafe {
            self.device
                .destroy_descriptor_set_layout(self.bake_set_layout, None);
            self.device
                .destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_command_pool(self.command_pool, None);
        }

        // Allocator needs the device alive
        let allocator = self
            .allocator
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        drop(allocator);

        unsafe {
            if let (Some(loader), Some(messenger)) =
                (&self.debug_utils_loader, self.debug_messenger.take())
            {
                loader.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }

        debug!("Vulkan context destroyed");
    }
}

/// Handles `GpuContext::new` has created so far. If initialization returns
/// early they are destroyed in reverse creation order; `release` hands them
/// over to the finished context instead.
struct PartialContext {
    instance: Option<ash::Instance>,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    device: Option<ash::Device>,
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    bake_set_layout: vk::DescriptorSetLayout,
}

impl PartialContext {
    fn new(instance: ash::Instance) -> Self {
        Self {
            instance: Some(instance),
            debug_utils: None,
            device: None,
            command_pool: vk::CommandPool::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            bake_set_layout: vk::DescriptorSetLayout::null(),
        }
    }

    /// Whether dropping the guard would destroy anything.
    fn owns_handles(&self) -> bool {
        self.instance.is_some() || self.debug_utils.is_some() || self.device.is_some()
    }

    fn release(&mut self) {
        self.device = None;
        self.debug_utils = None;
        self.instance = None;
        self.command_pool = vk::CommandPool::null();
        self.descriptor_pool = vk::DescriptorPool::null();
        self.bake_set_layout = vk::DescriptorSetLayout::null();
    }
}

impl Drop for PartialContext {
    fn drop(&mut self) {
        if !self.owns_handles() {
            return;
        }
        debug!("Destroying partially initialized Vulkan context");

        unsafe {
            if let Some(device) = self.device.take() {
                if self.bake_set_layout != vk::DescriptorSetLayout::null() {
                    device.destroy_descriptor_set_layout(self.bake_set_layout, None);
                }
                if self.descriptor_pool != vk::DescriptorPool::null() {
                    device.destroy_descriptor_pool(self.descriptor_pool, None);
                }
                if self.command_pool != vk::CommandPool::null() {
                    device.destroy_command_pool(self.command_pool, None);
                }
                device.destroy_device(None);
            }

            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }

            if let Some(instance) = self.instance.take() {
                instance.destroy_instance(None);
            }
        }
    }
}

/// Check that `HDR_FORMAT` can be rendered to, sampled, and copied in
/// optimal tiling. Returns whether blending is also supported.
fn check_hdr_format(features: vk::FormatFeatureFlags) -> Result<bool, String> {
    let required = vk::FormatFeatureFlags::COLOR_ATTACHMENT
        | vk::FormatFeatureFlags::SAMPLED_IMAGE
        | vk::FormatFeatureFlags::TRANSFER_SRC
        | vk::FormatFeatureFlags::TRANSFER_DST;

    if !features.contains(required) {
        return Err(format!(
            "{:?} is missing required optimal-tiling features: {:?}",
            HDR_FORMAT,
            required & !features
        ));
    }

    Ok(features.contains(vk::FormatFeatureFlags::COLOR_ATTACHMENT_BLEND))
}

/// Vulkan debug callback for validation layers.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _msg_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let msg = if callback_data.is_null() {
        "Unknown validation message".to_string()
    } else {
        let data = unsafe { &*callback_data };
        if data.p_message.is_null() {
            "Empty validation message".to_string()
        } else {
            unsafe { CStr::from_ptr(data.p_message) }
                .to_string_lossy()
                .into_owned()
        }
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[Vulkan] {}", msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[Vulkan] {}", msg);
    } else {
        log::info!("[Vulkan] {}", msg);
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hdr_format_without_transfer_is_rejected() {
        let features = vk::FormatFeatureFlags::COLOR_ATTACHMENT
            | vk::FormatFeatureFlags::SAMPLED_IMAGE
            | vk::FormatFeatureFlags::TRANSFER_SRC;
        let err = check_hdr_format(features).unwrap_err();
        assert!(err.contains("missing required"), "{}", err);
    }

    #[test]
    fn hdr_format_reports_blend_support() {
        let base = vk::FormatFeatureFlags::COLOR_ATTACHMENT
            | vk::FormatFeatureFlags::SAMPLED_IMAGE
            | vk::FormatFeatureFlags::TRANSFER_SRC
            | vk::FormatFeatureFlags::TRANSFER_DST;
        assert_eq!(check_hdr_format(base), Ok(false));
        assert_eq!(
            check_hdr_format(base | vk::FormatFeatureFlags::COLOR_ATTACHMENT_BLEND),
            Ok(true)
        );
    }

    #[test]
    fn abandoned_initialization_destroys_its_instance() {
        let Ok(entry) = (unsafe { ash::Entry::load() }) else {
            return;
        };
        let app_info = vk::ApplicationInfo::default().api_version(vk::make_api_version(0, 1, 2, 0));
        let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);
        let Ok(instance) = (unsafe { entry.create_instance(&create_info, None) }) else {
            return;
        };

        let partial = PartialContext::new(instance);
        assert!(partial.owns_handles());
        drop(partial);
    }

    #[test]
    fn released_guard_owns_nothing() {
        let Ok(entry) = (unsafe { ash::Entry::load() }) else {
            return;
        };
        let create_info = vk::InstanceCreateInfo::default();
        let Ok(instance) = (unsafe { entry.create_instance(&create_info, None) }) else {
            return;
        };

        let mut partial = PartialContext::new(instance.clone());
        partial.release();
        assert!(!partial.owns_handles());
        drop(partial);

        // Still ours to destroy, so the guard must not have done it.
        unsafe { instance.destroy_instance(None) };
    }
}
