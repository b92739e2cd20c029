//! 固定窗口滑动平均滤波器
//!
//! 作用于 6 维向量（IK 输出的关节位置、重力补偿力矩）。窗口在构造时
//! 一次性分配，`filter` 路径零分配，适合放在伺服周期内调用。
//! 窗口为 1 时等价于恒等映射。

use crate::types::VecDof;

/// 6 维向量滑动平均
#[derive(Debug, Clone)]
pub struct MovingAverage6 {
    window_size: usize,
    window_index: usize,
    window_sum: VecDof,
    window: Vec<VecDof>,
}

impl MovingAverage6 {
    /// 创建窗口大小为 `window_size` 的滤波器
    ///
    /// # Panics
    ///
    /// `window_size == 0` 时 panic。
    pub fn new(window_size: usize) -> Self {
        assert!(window_size > 0, "window size must be positive");
        Self {
            window_size,
            window_index: 0,
            window_sum: VecDof::zeros(),
            window: vec![VecDof::zeros(); window_size],
        }
    }

    /// 送入一个新样本，返回最近 `window_size` 个样本的均值
    ///
    /// 窗口未填满时，空槽按零向量计入（与重置后首样本的行为一致）。
    pub fn filter(&mut self, new_data: VecDof) -> VecDof {
        self.window_sum -= self.window[self.window_index];
        self.window_sum += new_data;
        self.window[self.window_index] = new_data;
        self.window_index = (self.window_index + 1) % self.window_size;
        self.window_sum / self.window_size as f64
    }

    /// 清空窗口
    pub fn reset(&mut self) {
        self.window_index = 0;
        self.window_sum = VecDof::zeros();
        self.window.fill(VecDof::zeros());
    }

    /// 修改窗口大小并清空历史
    pub fn set_window_size(&mut self, window_size: usize) {
        assert!(window_size > 0, "window size must be positive");
        self.window_size = window_size;
        self.window = vec![VecDof::zeros(); window_size];
        self.reset();
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_with_window_one() {
        let mut f = MovingAverage6::new(1);
        for i in 0..10 {
            let x = VecDof::from_element(i as f64 * 0.3 - 1.0);
            let y = f.filter(x);
            assert_eq!(x, y);
        }
    }

    #[test]
    fn test_mean_over_window() {
        let mut f = MovingAverage6::new(4);
        f.filter(VecDof::from_element(1.0));
        f.filter(VecDof::from_element(2.0));
        f.filter(VecDof::from_element(3.0));
        let y = f.filter(VecDof::from_element(4.0));
        assert!((y[0] - 2.5).abs() < 1e-12);
        // 第五个样本挤掉第一个
        let y = f.filter(VecDof::from_element(5.0));
        assert!((y[0] - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut f = MovingAverage6::new(3);
        f.filter(VecDof::from_element(9.0));
        f.filter(VecDof::from_element(9.0));
        f.reset();
        let y = f.filter(VecDof::from_element(3.0));
        assert!((y[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_set_window_size() {
        let mut f = MovingAverage6::new(3);
        f.filter(VecDof::from_element(6.0));
        f.set_window_size(1);
        assert_eq!(f.window_size(), 1);
        let y = f.filter(VecDof::from_element(2.0));
        assert!((y[0] - 2.0).abs() < 1e-12);
    }
}
