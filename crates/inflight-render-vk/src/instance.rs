// SPDX-License-Identifier: CEPL-1.0
//! Instance, debug messenger, physical device and logical device setup.

use std::ffi::{c_char, CStr, CString};

use anyhow::{anyhow, Context, Result};
#[cfg(debug_assertions)]
use ash::ext::debug_utils as ext_debug;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use tracing::{info, warn};

#[cfg(debug_assertions)]
pub(crate) type DebugState = Option<vk::DebugUtilsMessengerEXT>;
#[cfg(not(debug_assertions))]
pub(crate) type DebugState = ();

#[cfg(debug_assertions)]
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// What the chosen device can do, queried once at startup.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DeviceCaps {
    pub sampler_anisotropy: bool,
    pub max_sampler_anisotropy: f32,
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if !data.is_null() && !(*data).p_message.is_null() {
        let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
        if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            tracing::error!(target: "vulkan", "{}", msg);
        } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            tracing::warn!(target: "vulkan", "{}", msg);
        } else {
            tracing::trace!(target: "vulkan", "{}", msg);
        }
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
unsafe fn validation_available(entry: &Entry) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .map(|layers| {
            layers
                .iter()
                .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER)
        })
        .unwrap_or(false)
}

pub(crate) unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    app_name: &str,
) -> Result<Instance> {
    let app = CString::new(app_name).context("application name")?;
    let engine = c"inflight";

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: engine.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut ext_vec: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();

    #[cfg(debug_assertions)]
    let layers: Vec<*const c_char> = if validation_available(entry) {
        ext_vec.push(ext_debug::NAME.as_ptr());
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        warn!("validation layer not installed; continuing without it");
        Vec::new()
    };
    #[cfg(not(debug_assertions))]
    let layers: Vec<*const c_char> = Vec::new();

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    let instance = entry
        .create_instance(&create_info, None)
        .context("create_instance")?;
    info!("Vulkan instance created ({} layer(s))", layers.len());
    Ok(instance)
}

#[cfg(debug_assertions)]
pub(crate) unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> DebugState {
    if !validation_available(entry) {
        return None;
    }
    let loader = ext_debug::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    match loader.create_debug_utils_messenger(&ci, None) {
        Ok(m) => Some(m),
        Err(e) => {
            warn!("debug messenger unavailable: {:?}", e);
            None
        }
    }
}

#[cfg(not(debug_assertions))]
pub(crate) unsafe fn create_debug_messenger(_entry: &Entry, _instance: &Instance) -> DebugState {}

#[cfg(debug_assertions)]
pub(crate) unsafe fn destroy_debug_messenger(entry: &Entry, instance: &Instance, dbg: DebugState) {
    if let Some(m) = dbg {
        ext_debug::Instance::new(entry, instance).destroy_debug_utils_messenger(m, None);
    }
}

#[cfg(not(debug_assertions))]
pub(crate) unsafe fn destroy_debug_messenger(_entry: &Entry, _instance: &Instance, _dbg: DebugState) {
}

/// First device exposing a queue family that can both draw and present to
/// `surface`.
pub(crate) unsafe fn pick_device_and_queue(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    for phys in instance.enumerate_physical_devices()? {
        let qprops = instance.get_physical_device_queue_family_properties(phys);

        for (i, q) in qprops.iter().enumerate() {
            if q.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && surf_i
                    .get_physical_device_surface_support(phys, i as u32, surface)
                    .unwrap_or(false)
            {
                let props = instance.get_physical_device_properties(phys);
                let name = CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy();
                info!("using {} (queue family {})", name, i);
                return Ok((phys, i as u32));
            }
        }
    }
    Err(anyhow!("no suitable physical device/queue family"))
}

/// Logical device with one graphics+present queue and the swapchain
/// extension. Sampler anisotropy is enabled when the device has it.
pub(crate) unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<(ash::Device, vk::Queue, DeviceCaps)> {
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };

    let supported = instance.get_physical_device_features(phys);
    let limits = instance.get_physical_device_properties(phys).limits;
    let caps = DeviceCaps {
        sampler_anisotropy: supported.sampler_anisotropy == vk::TRUE,
        max_sampler_anisotropy: limits.max_sampler_anisotropy,
    };
    let features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: supported.sampler_anisotropy,
        ..Default::default()
    };

    let device_exts = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    let device = instance
        .create_device(phys, &dinfo, None)
        .context("create_device")?;
    let queue = device.get_device_queue(queue_family, 0);
    if !caps.sampler_anisotropy {
        warn!("sampler anisotropy not supported; textures use plain linear filtering");
    }
    Ok((device, queue, caps))
}
