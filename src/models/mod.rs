//! Data model for layout documents, keyboard descriptors, and result records.

pub mod behaviors;
pub mod build;
pub mod keyboard;
pub mod layout;
pub mod results;

pub use behaviors::{
    ComboBehavior, HoldTapBehavior, InputListener, InputListenerNode, MacroBehavior,
};
pub use build::{BuildMatrix, BuildTarget, FirmwareOutputFiles};
pub use keyboard::{
    CompileMethodConfig, FirmwareConfig, FlashConfig, FormattingConfig, KConfigOption,
    KConfigType, KeyboardConfig, KeymapSection, SystemBehavior,
};
pub use layout::{BindingParam, ConfigParameter, IntValue, LayerBindings, LayoutBinding, LayoutData};
pub use results::{BuildResult, FlashResult, LayoutResult, ResultRecord};
