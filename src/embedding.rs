use ndarray::prelude::*;

use crate::error::{Result, StoreError};

/// 模长小于等于该值的向量视为无效向量
pub const NORM_EPSILON: f32 = 1e-12;

/// 检查维度并对向量做 L2 归一化
pub fn normalize(vector: &[f32], dimension: usize) -> Result<Array1<f32>> {
    if vector.len() != dimension {
        return Err(StoreError::DimensionMismatch { expected: dimension, actual: vector.len() });
    }
    let v = ArrayView1::from(vector);
    let norm = v.dot(&v).sqrt();
    if !norm.is_finite() || norm <= NORM_EPSILON {
        return Err(StoreError::ZeroNormVector);
    }
    Ok(v.mapv(|x| x / norm))
}

/// 图片特征向量矩阵，形状为 (N, D)，每行都是单位向量
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    data: Array2<f32>,
}

impl EmbeddingStore {
    pub fn empty(dimension: usize) -> Self {
        Self { data: Array2::zeros((0, dimension)) }
    }

    /// 一次性构建向量矩阵
    ///
    /// 维度不一致时整体失败；模长为 0 的向量会被跳过，返回值的第二项为被跳过的行号
    pub fn build<'a, I>(dimension: usize, rows: I) -> Result<(Self, Vec<usize>)>
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        let mut builder = EmbeddingStoreBuilder::new(dimension);
        let mut rejected = vec![];
        for (i, row) in rows.into_iter().enumerate() {
            match builder.push(row) {
                Ok(_) => {}
                Err(StoreError::ZeroNormVector) => rejected.push(i),
                Err(e) => return Err(e),
            }
        }
        Ok((builder.finish()?, rejected))
    }

    /// 从已经归一化的矩阵创建，用于从磁盘加载
    pub fn from_array(data: Array2<f32>) -> Self {
        Self { data }
    }

    pub fn as_array(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.data.ncols()
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f32> {
        self.data.row(i)
    }

    /// 计算查询向量和每一行的余弦相似度
    ///
    /// 查询向量会先单独归一化，之后只需要做一次矩阵乘法
    pub fn similarity_column(&self, query: &[f32]) -> Result<Vec<f64>> {
        let query = normalize(query, self.dimension())?;
        let scores = self.data.dot(&query);
        Ok(scores.iter().map(|&s| (s as f64).clamp(-1.0, 1.0)).collect())
    }

    /// 检查每一行是否为单位向量，返回第一个不满足条件的行号
    pub fn find_unnormalized(&self, tolerance: f32) -> Option<usize> {
        self.data.rows().into_iter().position(|row| (row.dot(&row).sqrt() - 1.0).abs() > tolerance)
    }
}

/// 逐行追加向量的构建器
pub struct EmbeddingStoreBuilder {
    dimension: usize,
    rows: usize,
    buffer: Vec<f32>,
}

impl EmbeddingStoreBuilder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, rows: 0, buffer: vec![] }
    }

    /// 归一化并追加一行，返回该行的行号
    pub fn push(&mut self, vector: &[f32]) -> Result<usize> {
        let v = normalize(vector, self.dimension)?;
        self.buffer.extend(v.iter());
        self.rows += 1;
        Ok(self.rows - 1)
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn finish(self) -> Result<EmbeddingStore> {
        let data = Array2::from_shape_vec((self.rows, self.dimension), self.buffer)?;
        Ok(EmbeddingStore { data })
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    #[rstest]
    fn test_normalize_unit_length() {
        let v = normalize(&[3.0, 4.0], 2).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[rstest]
    #[case(vec![0.0, 0.0, 0.0])]
    #[case(vec![f32::NAN, 1.0, 0.0])]
    fn test_normalize_degenerate(#[case] v: Vec<f32>) {
        assert!(matches!(normalize(&v, 3), Err(StoreError::ZeroNormVector)));
    }

    #[rstest]
    fn test_build_dimension_mismatch() {
        let rows: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]];
        let result = EmbeddingStore::build(2, rows.iter().map(|r| r.as_slice()));
        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[rstest]
    fn test_build_skips_zero_rows() {
        let rows: Vec<Vec<f32>> = vec![vec![2.0, 0.0], vec![0.0, 0.0], vec![0.0, 5.0]];
        let (store, rejected) = EmbeddingStore::build(2, rows.iter().map(|r| r.as_slice())).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(rejected, vec![1]);
        assert_eq!(store.find_unnormalized(1e-6), None);
    }

    #[rstest]
    fn test_similarity_column() {
        let rows: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0], vec![1.0, 1.0]];
        let (store, _) = EmbeddingStore::build(2, rows.iter().map(|r| r.as_slice())).unwrap();

        // 查询向量不需要预先归一化
        let sims = store.similarity_column(&[10.0, 0.0]).unwrap();
        assert_eq!(sims.len(), 4);
        assert!((sims[0] - 1.0).abs() < 1e-6);
        assert!(sims[1].abs() < 1e-6);
        assert!((sims[2] + 1.0).abs() < 1e-6);
        assert!((sims[3] - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!(sims.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[rstest]
    fn test_similarity_column_rejects_bad_query() {
        let store = EmbeddingStore::empty(4);
        assert!(matches!(
            store.similarity_column(&[1.0, 0.0]),
            Err(StoreError::DimensionMismatch { .. })
        ));
        assert!(matches!(store.similarity_column(&[0.0; 4]), Err(StoreError::ZeroNormVector)));
    }
}
