// 该文件是 Sampah （垃圾识别） 项目的一部分。
// src/registry.rs - 模型注册表
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info};

use crate::model::{Backend, Model, ModelLoadError, YoloSeg, YoloSegBuilder};

/// 根据模型路径与标签路径构建推理引擎
pub trait EngineLoader: Send + Sync {
  type Engine: Model;

  fn load(&self, model_path: &Path, labels_path: &Path) -> Result<Self::Engine, ModelLoadError>;
}

/// 基于 ONNX Runtime 的加载器
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxLoader {
  pub backend: Backend,
  pub intra_threads: Option<usize>,
}

impl OnnxLoader {
  pub fn new(backend: Backend) -> Self {
    OnnxLoader {
      backend,
      intra_threads: None,
    }
  }
}

impl EngineLoader for OnnxLoader {
  type Engine = YoloSeg;

  fn load(&self, model_path: &Path, labels_path: &Path) -> Result<YoloSeg, ModelLoadError> {
    let mut builder = YoloSegBuilder::new(model_path)
      .labels(labels_path)
      .backend(self.backend);
    if let Some(threads) = self.intra_threads {
      builder = builder.intra_threads(threads);
    }
    builder.build()
  }
}

/// 每个模型路径只加载一次的引擎缓存
///
/// 已加载的引擎通过读锁直接返回；首次加载时持有加载锁并再次检查，
/// 保证并发的首次请求只触发一次加载。条目不会被移除。
pub struct ModelRegistry<L: EngineLoader = OnnxLoader> {
  loader: L,
  engines: RwLock<HashMap<PathBuf, Arc<L::Engine>>>,
  load_lock: Mutex<()>,
}

impl<L: EngineLoader> ModelRegistry<L> {
  pub fn new(loader: L) -> Self {
    ModelRegistry {
      loader,
      engines: RwLock::new(HashMap::new()),
      load_lock: Mutex::new(()),
    }
  }

  pub fn get(&self, model_path: &Path) -> Option<Arc<L::Engine>> {
    self
      .engines
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(model_path)
      .cloned()
  }

  /// 获取已加载的引擎，不存在时加载
  ///
  /// 标签路径只在首次加载时需要，之后被忽略。加载失败时注册表保持不变。
  pub fn get_or_load(
    &self,
    model_path: &Path,
    labels_path: Option<&Path>,
  ) -> Result<Arc<L::Engine>, ModelLoadError> {
    if let Some(engine) = self.get(model_path) {
      return Ok(engine);
    }

    let _guard = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(engine) = self.get(model_path) {
      debug!("模型已由其他调用加载: {}", model_path.display());
      return Ok(engine);
    }

    let labels_path = labels_path
      .ok_or_else(|| ModelLoadError::MissingLabels(model_path.display().to_string()))?;
    info!("首次加载模型: {}", model_path.display());
    let engine = Arc::new(self.loader.load(model_path, labels_path)?);

    self
      .engines
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(model_path.to_path_buf(), Arc::clone(&engine));
    Ok(engine)
  }

  pub fn contains(&self, model_path: &Path) -> bool {
    self.get(model_path).is_some()
  }

  pub fn len(&self) -> usize {
    self.engines.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::LetterboxFrame;
  use crate::model::{InferenceError, Labels, RawOutput};
  use std::sync::Barrier;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::thread;
  use std::time::Duration;

  struct StubEngine {
    labels: Labels,
  }

  impl Model for StubEngine {
    fn input_size(&self) -> (usize, usize) {
      (32, 32)
    }

    fn labels(&self) -> &Labels {
      &self.labels
    }

    fn infer(&self, _input: &LetterboxFrame) -> Result<RawOutput, InferenceError> {
      Err(InferenceError::MalformedOutput("stub".to_string()))
    }
  }

  #[derive(Default)]
  struct CountingLoader {
    loads: AtomicUsize,
  }

  impl EngineLoader for CountingLoader {
    type Engine = StubEngine;

    fn load(&self, model_path: &Path, _labels_path: &Path) -> Result<StubEngine, ModelLoadError> {
      self.loads.fetch_add(1, Ordering::SeqCst);
      // 放大竞争窗口
      thread::sleep(Duration::from_millis(20));
      if model_path.ends_with("broken.onnx") {
        return Err(ModelLoadError::InvalidModel("broken".to_string()));
      }
      Ok(StubEngine {
        labels: Labels::new(["bottle", "can"]),
      })
    }
  }

  #[test]
  fn concurrent_first_use_loads_once() {
    let registry = Arc::new(ModelRegistry::new(CountingLoader::default()));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let registry = Arc::clone(&registry);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
          barrier.wait();
          registry
            .get_or_load(Path::new("/models/pcs.onnx"), Some(Path::new("/models/data.yaml")))
            .unwrap()
        })
      })
      .collect();

    let engines: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(registry.loader.loads.load(Ordering::SeqCst), 1);
    assert!(engines.iter().all(|e| Arc::ptr_eq(e, &engines[0])));
    assert_eq!(engines[0].labels().name_of(1), "can");
  }

  #[test]
  fn labels_are_ignored_after_first_load() {
    let registry = ModelRegistry::new(CountingLoader::default());
    let path = Path::new("/models/pile.onnx");
    registry.get_or_load(path, Some(Path::new("/models/pile.yaml"))).unwrap();
    registry.get_or_load(path, None).unwrap();
    assert_eq!(registry.loader.loads.load(Ordering::SeqCst), 1);
    assert_eq!(registry.len(), 1);
  }

  #[test]
  fn first_load_requires_labels() {
    let registry = ModelRegistry::new(CountingLoader::default());
    let result = registry.get_or_load(Path::new("/models/pcs.onnx"), None);
    assert!(matches!(result, Err(ModelLoadError::MissingLabels(_))));
    assert_eq!(registry.loader.loads.load(Ordering::SeqCst), 0);
    assert!(registry.is_empty());
  }

  #[test]
  fn failed_load_leaves_no_entry() {
    let registry = ModelRegistry::new(CountingLoader::default());
    let path = Path::new("/models/broken.onnx");
    let labels = Some(Path::new("/models/data.yaml"));

    assert!(registry.get_or_load(path, labels).is_err());
    assert!(!registry.contains(path));
    // 失败后再次请求会重新尝试加载
    assert!(registry.get_or_load(path, labels).is_err());
    assert_eq!(registry.loader.loads.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn distinct_paths_get_distinct_engines() {
    let registry = ModelRegistry::new(CountingLoader::default());
    let labels = Some(Path::new("/models/data.yaml"));
    let a = registry.get_or_load(Path::new("/models/a.onnx"), labels).unwrap();
    let b = registry.get_or_load(Path::new("/models/b.onnx"), labels).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len(), 2);
  }
}
