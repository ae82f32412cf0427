//! Vulkan 1.3 instance, with the Khronos validation layer and a debug
//! messenger that forwards driver messages to `tracing`.

use std::borrow::Cow;
use std::ffi::{CStr, CString, c_char, c_void};

use ash::{Entry, vk};
use tracing::{Level, debug, error, info, trace, warn};

use crate::error::{RhiError, RhiResult};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"Vulkan Simulation Engine";

type DebugMessenger = (ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT);

/// Instance plus its optional debug messenger, destroyed messenger first.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    messenger: Option<DebugMessenger>,
}

impl Instance {
    /// Loads Vulkan and creates the instance.
    ///
    /// `enable_validation` is a request: when the layer is not installed the
    /// instance comes up without it and a warning is logged.
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        surface_extensions: &[*const c_char],
    ) -> RhiResult<Self> {
        let app_name = CString::new(app_name)
            .map_err(|e| RhiError::InvalidArgument(format!("application name: {e}")))?;
        let entry = unsafe { Entry::load()? };

        let validate = enable_validation && validation_layer_present(&entry)?;
        if enable_validation && !validate {
            warn!("validation layer requested but not installed");
        }

        let version = vk::make_api_version(0, 1, 0, 0);
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(version)
            .engine_name(ENGINE_NAME)
            .engine_version(version)
            .api_version(vk::API_VERSION_1_3);

        let extensions = instance_extensions(surface_extensions, validate);
        let layers: Vec<*const c_char> = if validate {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        let instance = unsafe { entry.create_instance(&info, None)? };
        info!(app = %app_name.to_string_lossy(), validate, "Vulkan instance created");

        let messenger = if validate {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match unsafe { loader.create_debug_utils_messenger(&messenger_info(), None) } {
                Ok(handle) => Some((loader, handle)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            messenger,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    #[inline]
    pub fn has_validation(&self) -> bool {
        self.messenger.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, handle)) = self.messenger.take() {
                loader.destroy_debug_utils_messenger(handle, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

fn validation_layer_present(entry: &Entry) -> RhiResult<bool> {
    let layers = unsafe { entry.enumerate_instance_layer_properties()? };
    Ok(layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER)))
}

/// Window-system extensions, plus debug utils when validating.
fn instance_extensions(surface: &[*const c_char], debug_utils: bool) -> Vec<*const c_char> {
    let mut extensions = surface.to_vec();
    if debug_utils {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }
    extensions
}

fn messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => Level::ERROR,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => Level::WARN,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn message_kind(kind: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    match kind {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "general",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "other",
    }
}

/// # Safety
///
/// Called by the loader with callback data that is null or valid for the
/// duration of the call.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = match unsafe { data.as_ref() } {
        Some(data) if !data.p_message.is_null() => unsafe { CStr::from_ptr(data.p_message) }.to_string_lossy(),
        _ => Cow::Borrowed("(no message)"),
    };
    let kind = message_kind(kind);

    match severity_level(severity) {
        Level::ERROR => error!(target: "vulkan", kind, "{message}"),
        Level::WARN => warn!(target: "vulkan", kind, "{message}"),
        Level::DEBUG => debug!(target: "vulkan", kind, "{message}"),
        _ => trace!(target: "vulkan", kind, "{message}"),
    }

    // Never abort the call that raised the message.
    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_creation_without_validation() {
        // Needs a Vulkan loader and driver.
        match Instance::new("instance test", false, &[]) {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(e) => eprintln!("Skipping test: Vulkan not available ({e})"),
        }
    }

    #[test]
    fn test_interior_nul_in_app_name_is_rejected() {
        assert!(matches!(
            Instance::new("bad\0name", false, &[]),
            Err(RhiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_debug_utils_appended_only_when_validating() {
        let surface = [ash::khr::surface::NAME.as_ptr()];
        assert_eq!(instance_extensions(&surface, false).len(), 1);

        let validating = instance_extensions(&surface, true);
        assert_eq!(validating.len(), 2);
        assert_eq!(validating[1], ash::ext::debug_utils::NAME.as_ptr());
    }

    #[test]
    fn test_severity_maps_to_tracing_level() {
        assert_eq!(severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR), Level::ERROR);
        assert_eq!(severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING), Level::WARN);
        assert_eq!(severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::INFO), Level::DEBUG);
        assert_eq!(severity_level(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE), Level::TRACE);
    }

    #[test]
    fn test_message_kinds() {
        assert_eq!(message_kind(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION), "validation");
        assert_eq!(
            message_kind(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
            ),
            "other"
        );
    }
}
