//! Common macros for the modana core.
//!
//! - `type_tags!` declares an open, append-only tag enumeration backed by `u32`.
//! - `enum_from_str!` generates `Display` and `FromStr` for closed enums.
//! - `declare_extension!` exports the native entry points of an extension module.

/// Declare an open tag enumeration.
///
/// The generated type is a `u32` newtype with one associated constant per
/// known tag. Values at or above the custom base are reserved for
/// application-defined tags, so new built-in tags can be appended below the
/// base without renumbering anything that is already shipped.
///
/// # Example
///
/// ```rust
/// use modana_core::type_tags;
///
/// type_tags! {
///     /// Colour tags.
///     pub struct Colour {
///         RED = 0 => "red",
///         GREEN = 1 => "green",
///     }
///     custom_base = 100;
/// }
///
/// assert_eq!(Colour::RED.label(), Some("red"));
/// assert_eq!(Colour::custom(3).raw(), 103);
/// assert!(Colour::custom(3).is_custom());
/// ```
#[macro_export]
macro_rules! type_tags {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($(#[$cmeta:meta])* $tag:ident = $value:expr => $label:expr),* $(,)?
        }
        custom_base = $base:expr;
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis struct $name(u32);

        impl $name {
            $(
                $(#[$cmeta])*
                pub const $tag: Self = Self($value);
            )*

            /// First raw value available to application-defined tags.
            pub const CUSTOM_BASE: u32 = $base;

            /// Application-defined tag, `offset` positions above the custom base.
            pub const fn custom(offset: u32) -> Self {
                Self(($base as u32).saturating_add(offset))
            }

            /// Rebuild a tag from its raw numeric value.
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            /// Raw numeric value. Stable across releases.
            pub const fn raw(self) -> u32 {
                self.0
            }

            pub const fn is_custom(self) -> bool {
                self.0 >= $base
            }

            /// Human-readable label for built-in tags.
            pub fn label(self) -> Option<&'static str> {
                match self.0 {
                    $(v if v == $value => Some($label),)*
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self.label() {
                    Some(label) => f.write_str(label),
                    None => write!(f, "custom({})", self.0),
                }
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

/// Macro to generate Display and FromStr implementations for an enum.
///
/// # Example
///
/// ```rust
/// use modana_core::enum_from_str;
///
/// enum Mode {
///     Fast,
///     Safe,
/// }
///
/// enum_from_str!(Mode, [Fast => "fast", Safe => "safe"]);
///
/// assert!("fast".parse::<Mode>().is_ok());
/// ```
#[macro_export]
macro_rules! enum_from_str {
    ($enum_name:ident, [$($variant:ident => $str:literal),* $(,)?]) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $($enum_name::$variant => write!(f, $str)),*
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($str => Ok($enum_name::$variant),)*
                    _ => Err(format!("Unknown {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

/// Export the native entry points of an extension module.
///
/// Generates `modana_extension_abi_version` and `modana_extension_create`,
/// the two symbols [`NativeExtensionLoader`](crate::extension::NativeExtensionLoader)
/// resolves. The extension crate must be built as a `cdylib`.
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct SurfaceViewer;
///
/// impl modana_core::extension::Extension for SurfaceViewer { /* ... */ }
///
/// modana_core::declare_extension!(SurfaceViewer);
/// ```
#[macro_export]
macro_rules! declare_extension {
    ($ty:ty) => {
        $crate::declare_extension!($ty, <$ty as ::std::default::Default>::default);
    };
    ($ty:ty, $ctor:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn modana_extension_abi_version() -> u32 {
            $crate::extension::ABI_VERSION
        }

        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn modana_extension_create() -> *mut $crate::extension::ExtensionBox {
            let ctor: fn() -> $ty = $ctor;
            let extension: $crate::extension::ExtensionBox = ::std::boxed::Box::new(ctor());
            ::std::boxed::Box::into_raw(::std::boxed::Box::new(extension))
        }
    };
}
