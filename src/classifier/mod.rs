pub mod classifier;
pub mod forest;
pub mod model;
pub mod onnx;

pub use classifier::{classify, AttackGate, CascadeClassifier, ATTACK_CLASS};
pub use forest::{DecisionTree, RandomForest, TreeNode};
pub use model::{argmax, Classifier};
pub use onnx::{onnx_environment, OnnxClassifier};
