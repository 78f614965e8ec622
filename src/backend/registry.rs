//! Statically linked plugin set
//!
//! Plugins are declared at compile time and registered once per backend. Each
//! one provides a handful of element factories, looked up by name when a launch
//! description is turned into a graph.

use std::collections::{BTreeMap, HashMap};

/// Role an element can play in a linear graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Source,
    Filter,
    Sink,
    /// Sink exposing pulled frames to application code
    AppSink,
    /// Source accepting frames pushed by application code
    AppSrc,
}

#[derive(Debug)]
pub struct PluginDescriptor {
    pub name: &'static str,
    pub elements: &'static [(&'static str, ElementKind)],
}

use ElementKind::*;

pub static STATIC_PLUGINS: &[PluginDescriptor] = &[
    PluginDescriptor {
        name: "coreelements",
        elements: &[
            ("fakesrc", Source),
            ("fakesink", Sink),
            ("queue", Filter),
            ("identity", Filter),
            ("capsfilter", Filter),
            ("tee", Filter),
        ],
    },
    PluginDescriptor {
        name: "app",
        elements: &[("appsrc", AppSrc), ("appsink", AppSink)],
    },
    PluginDescriptor {
        name: "videotestsrc",
        elements: &[("videotestsrc", Source)],
    },
    PluginDescriptor {
        name: "videoconvertscale",
        elements: &[
            ("videoconvert", Filter),
            ("videoscale", Filter),
            ("videoconvertscale", Filter),
        ],
    },
    PluginDescriptor {
        name: "videofilter",
        elements: &[("videoflip", Filter), ("videobalance", Filter)],
    },
    PluginDescriptor {
        name: "androidmedia",
        elements: &[("ahcsrc", Source)],
    },
    PluginDescriptor {
        name: "opengl",
        elements: &[
            ("glimagesink", Sink),
            ("glupload", Filter),
            ("glcolorconvert", Filter),
        ],
    },
    PluginDescriptor {
        name: "ogg",
        elements: &[("oggdemux", Filter), ("oggmux", Filter)],
    },
    PluginDescriptor {
        name: "theora",
        elements: &[("theoradec", Filter), ("theoraenc", Filter)],
    },
    PluginDescriptor {
        name: "vorbis",
        elements: &[("vorbisdec", Filter), ("vorbisenc", Filter)],
    },
    PluginDescriptor {
        name: "audioconvert",
        elements: &[("audioconvert", Filter)],
    },
    PluginDescriptor {
        name: "audioresample",
        elements: &[("audioresample", Filter)],
    },
    PluginDescriptor {
        name: "playback",
        elements: &[("playbin", Source), ("decodebin", Filter)],
    },
    PluginDescriptor {
        name: "soup",
        elements: &[("souphttpsrc", Source)],
    },
    PluginDescriptor {
        name: "opensles",
        elements: &[("openslessrc", Source), ("openslessink", Sink)],
    },
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("plugin '{0}' is already registered")]
    DuplicatePlugin(String),
    #[error("element '{element}' of plugin '{plugin}' is already provided by '{existing}'")]
    DuplicateElement {
        element: String,
        plugin: String,
        existing: String,
    },
}

/// A registered element factory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementFactory {
    pub name: &'static str,
    pub kind: ElementKind,
    pub plugin: &'static str,
}

#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<&'static str, &'static PluginDescriptor>,
    factories: HashMap<&'static str, ElementFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every statically linked plugin
    pub fn with_static_plugins() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for plugin in STATIC_PLUGINS {
            registry.register(plugin)?;
        }
        Ok(registry)
    }

    /// Add a plugin. Nothing is registered if the plugin or any of its elements clash.
    pub fn register(&mut self, plugin: &'static PluginDescriptor) -> Result<(), RegistryError> {
        if self.plugins.contains_key(plugin.name) {
            return Err(RegistryError::DuplicatePlugin(plugin.name.to_string()));
        }
        if let Some((element, existing)) = plugin
            .elements
            .iter()
            .find_map(|(name, _)| self.factories.get(name).map(|f| (name, f.plugin)))
        {
            return Err(RegistryError::DuplicateElement {
                element: element.to_string(),
                plugin: plugin.name.to_string(),
                existing: existing.to_string(),
            });
        }

        for &(name, kind) in plugin.elements {
            self.factories.insert(
                name,
                ElementFactory {
                    name,
                    kind,
                    plugin: plugin.name,
                },
            );
        }
        self.plugins.insert(plugin.name, plugin);
        log::trace!("Registered plugin {}", plugin.name);
        Ok(())
    }

    pub fn lookup(&self, factory: &str) -> Option<ElementFactory> {
        self.factories.get(factory).copied()
    }

    pub fn plugin_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.plugins.keys().copied()
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    pub fn element_count(&self) -> usize {
        self.factories.len()
    }
}
