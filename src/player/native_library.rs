use crate::core::{BuildInfo, PlayerError, Result};
use libloading::{Library, Symbol};
use log::info;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::path::{Path, PathBuf};

/// 原生库导出的构建信息函数：`const char *fn(void)`
type BuildStringFn = unsafe extern "C" fn() -> *const c_char;

const VERSION_SYMBOL: &[u8] = b"libvlc_get_version\0";
const COMPILER_SYMBOL: &[u8] = b"libvlc_get_compiler\0";
const CHANGESET_SYMBOL: &[u8] = b"libvlc_get_changeset\0";

/// 已加载的原生引擎库
pub struct NativeLibrary {
    path: PathBuf,
    library: Library,
}

impl NativeLibrary {
    /// 加载原生库并检查必需的入口
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // SAFETY: 加载外部动态库会执行其初始化代码，调用方负责提供可信的库路径
        let library = unsafe { Library::new(path) }
            .map_err(|e| PlayerError::LibraryLoad(format!("{}: {}", path.display(), e)))?;

        let loaded = Self {
            path: path.to_path_buf(),
            library,
        };
        let build_info = loaded.build_info()?;
        info!(
            "✅ 已加载原生库 {}（版本 {}）",
            loaded.path.display(),
            build_info.version
        );
        Ok(loaded)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取库的构建信息
    pub fn build_info(&self) -> Result<BuildInfo> {
        Ok(BuildInfo {
            version: self.read_string(VERSION_SYMBOL)?,
            compiler: self.read_string(COMPILER_SYMBOL)?,
            changeset: self.read_string(CHANGESET_SYMBOL)?,
        })
    }

    fn read_string(&self, symbol: &[u8]) -> Result<String> {
        let name = String::from_utf8_lossy(&symbol[..symbol.len() - 1]).to_string();

        // SAFETY: 函数签名与 libvlc 头文件一致
        let func: Symbol<BuildStringFn> = unsafe { self.library.get(symbol) }
            .map_err(|e| PlayerError::LibraryLoad(format!("缺少入口 `{}`: {}", name, e)))?;

        // SAFETY: 返回库内部的静态字符串，库加载期间有效
        let ptr = unsafe { func() };
        if ptr.is_null() {
            return Err(PlayerError::LibraryLoad(format!("`{}` 返回空指针", name)));
        }
        let value = unsafe { CStr::from_ptr(ptr) };
        Ok(value.to_string_lossy().into_owned())
    }
}
